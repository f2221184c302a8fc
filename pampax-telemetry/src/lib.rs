//! Metrics aggregation, pluggable sinks, correlated logging, and the
//! task-local correlation id every pipeline stage carries end-to-end.

pub mod correlation;
pub mod logger;
pub mod metrics;

pub use correlation::{current_correlation_id, with_correlation, with_correlation_sync};
pub use logger::{init_subscriber, Level, LogEvent, LogFields, Logger};
pub use metrics::{
    aggregation_key, Aggregator, FileSink, HistogramSnapshot, MetricEvent, MetricSink,
    MetricType, MetricsCollector, PrometheusSink, StderrSink, StdoutSink,
};
