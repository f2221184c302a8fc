//! Metric events, the in-process aggregator, and pluggable sinks
//! (stdout/stderr/file/prometheus). Recording a metric never blocks the
//! caller: the aggregator update is synchronous and cheap, but dispatch to
//! sinks is handed off to a spawned task.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pampax_core::identity::Timestamp;
use serde::Serialize;

/// The four metric kinds the pipeline records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Timing,
    Counter,
    Gauge,
    Histogram,
}

/// A single recorded metric observation.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEvent {
    pub metric: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub timestamp: Timestamp,
    pub corr_id: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
}

/// Builds the aggregation key `metric:tag_k:tag_v:...` (tags sorted by key
/// for determinism, since `tags` is a `BTreeMap`).
pub fn aggregation_key(metric: &str, tags: &BTreeMap<String, String>) -> String {
    let mut key = metric.to_string();
    for (k, v) in tags {
        key.push(':');
        key.push_str(k);
        key.push(':');
        key.push_str(v);
    }
    key
}

fn flatten_tags(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Rolling stats for one histogram key.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

struct HistogramAgg {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramAgg {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            avg: if self.count == 0 { 0.0 } else { self.sum / self.count as f64 },
        }
    }
}

/// In-process aggregator state: counters accumulate, gauges hold the
/// last-written value, histograms keep running count/sum/min/max.
#[derive(Default)]
pub struct Aggregator {
    counters: Mutex<HashMap<String, f64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, HistogramAgg>>,
}

impl Aggregator {
    fn record(&self, event: &MetricEvent) {
        let key = aggregation_key(&event.metric, &event.tags);
        match event.metric_type {
            MetricType::Counter => {
                *self.counters.lock().unwrap().entry(key).or_insert(0.0) += event.value;
            }
            MetricType::Gauge => {
                self.gauges.lock().unwrap().insert(key, event.value);
            }
            MetricType::Timing | MetricType::Histogram => {
                self.histograms
                    .lock()
                    .unwrap()
                    .entry(key)
                    .and_modify(|h| h.observe(event.value))
                    .or_insert_with(|| HistogramAgg::new(event.value));
            }
        }
    }

    pub fn counter(&self, metric: &str, tags: &BTreeMap<String, String>) -> Option<f64> {
        self.counters.lock().unwrap().get(&aggregation_key(metric, tags)).copied()
    }

    pub fn gauge(&self, metric: &str, tags: &BTreeMap<String, String>) -> Option<f64> {
        self.gauges.lock().unwrap().get(&aggregation_key(metric, tags)).copied()
    }

    pub fn histogram(&self, metric: &str, tags: &BTreeMap<String, String>) -> Option<HistogramSnapshot> {
        self.histograms
            .lock()
            .unwrap()
            .get(&aggregation_key(metric, tags))
            .map(HistogramAgg::snapshot)
    }
}

/// A destination for metric events. Implementations must not block the
/// recording caller for long; `MetricsCollector` dispatches to sinks on a
/// spawned task.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn emit(&self, event: &MetricEvent);
}

fn render_line(event: &MetricEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}

/// Writes one JSON object per line to stdout.
pub struct StdoutSink;

#[async_trait]
impl MetricSink for StdoutSink {
    async fn emit(&self, event: &MetricEvent) {
        println!("{}", render_line(event));
    }
}

/// Writes one JSON object per line to stderr.
pub struct StderrSink;

#[async_trait]
impl MetricSink for StderrSink {
    async fn emit(&self, event: &MetricEvent) {
        eprintln!("{}", render_line(event));
    }
}

/// Appends one JSON object per line to a file.
pub struct FileSink {
    file: Mutex<std::fs::File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

#[async_trait]
impl MetricSink for FileSink {
    async fn emit(&self, event: &MetricEvent) {
        let line = render_line(event);
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Bridges metric events into Prometheus. Counter/gauge/histogram vectors
/// are registered lazily, one per metric name, the first time that name is
/// observed; the pipeline's free-form tag map is flattened into a single
/// `tags` label (`"k=v,k=v"`) since Prometheus label sets must be fixed at
/// registration time.
#[derive(Default)]
pub struct PrometheusSink {
    counters: Mutex<HashMap<String, prometheus::CounterVec>>,
    gauges: Mutex<HashMap<String, prometheus::GaugeVec>>,
    histograms: Mutex<HashMap<String, prometheus::HistogramVec>>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricSink for PrometheusSink {
    async fn emit(&self, event: &MetricEvent) {
        let tags = flatten_tags(&event.tags);
        match event.metric_type {
            MetricType::Counter => {
                let mut counters = self.counters.lock().unwrap();
                let vec = counters.entry(event.metric.clone()).or_insert_with(|| {
                    prometheus::register_counter_vec!(event.metric.clone(), "pampax counter", &["tags"])
                        .unwrap_or_else(|_| prometheus::CounterVec::new(
                            prometheus::Opts::new(event.metric.clone(), "pampax counter"),
                            &["tags"],
                        ).expect("static CounterVec construction cannot fail"))
                });
                vec.with_label_values(&[&tags]).inc_by(event.value);
            }
            MetricType::Gauge => {
                let mut gauges = self.gauges.lock().unwrap();
                let vec = gauges.entry(event.metric.clone()).or_insert_with(|| {
                    prometheus::register_gauge_vec!(event.metric.clone(), "pampax gauge", &["tags"])
                        .unwrap_or_else(|_| prometheus::GaugeVec::new(
                            prometheus::Opts::new(event.metric.clone(), "pampax gauge"),
                            &["tags"],
                        ).expect("static GaugeVec construction cannot fail"))
                });
                vec.with_label_values(&[&tags]).set(event.value);
            }
            MetricType::Timing | MetricType::Histogram => {
                let mut histograms = self.histograms.lock().unwrap();
                let vec = histograms.entry(event.metric.clone()).or_insert_with(|| {
                    prometheus::register_histogram_vec!(event.metric.clone(), "pampax histogram", &["tags"])
                        .unwrap_or_else(|_| prometheus::HistogramVec::new(
                            prometheus::HistogramOpts::new(event.metric.clone(), "pampax histogram"),
                            &["tags"],
                        ).expect("static HistogramVec construction cannot fail"))
                });
                vec.with_label_values(&[&tags]).observe(event.value);
            }
        }
    }
}

/// Deterministic leaky-bucket sampler: accumulates `sampling_rate` credit
/// per call and fires whenever the balance crosses 1.0. At `1.0` every call
/// fires; at `0.0` none do.
struct Sampler {
    rate_millis: u64,
    credit_millis: AtomicU64,
}

impl Sampler {
    fn new(rate: f32) -> Self {
        let rate = rate.clamp(0.0, 1.0);
        Self {
            rate_millis: (rate * 1000.0).round() as u64,
            credit_millis: AtomicU64::new(0),
        }
    }

    fn should_emit(&self) -> bool {
        if self.rate_millis == 0 {
            return false;
        }
        if self.rate_millis >= 1000 {
            return true;
        }
        let credit = self.credit_millis.fetch_add(self.rate_millis, Ordering::Relaxed) + self.rate_millis;
        if credit >= 1000 {
            self.credit_millis.fetch_sub(1000, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Records metric events into the aggregator and fans them out to every
/// configured sink, subject to `sampling_rate`.
pub struct MetricsCollector {
    sinks: Vec<Arc<dyn MetricSink>>,
    aggregator: Arc<Aggregator>,
    sampler: Sampler,
}

impl MetricsCollector {
    pub fn new(sinks: Vec<Arc<dyn MetricSink>>, sampling_rate: f32) -> Self {
        Self {
            sinks,
            aggregator: Arc::new(Aggregator::default()),
            sampler: Sampler::new(sampling_rate),
        }
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        self.aggregator.clone()
    }

    fn record(&self, metric: &str, value: f64, tags: BTreeMap<String, String>, metric_type: MetricType) {
        let event = MetricEvent {
            metric: metric.to_string(),
            value,
            tags,
            timestamp: chrono::Utc::now(),
            corr_id: crate::correlation::current_correlation_id(),
            metric_type,
        };
        self.aggregator.record(&event);

        if !self.sampler.should_emit() {
            return;
        }
        for sink in &self.sinks {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move { sink.emit(&event).await });
        }
    }

    pub fn timing(&self, metric: &str, duration_ms: f64, tags: BTreeMap<String, String>) {
        self.record(metric, duration_ms, tags, MetricType::Timing);
    }

    pub fn counter(&self, metric: &str, value: f64, tags: BTreeMap<String, String>) {
        self.record(metric, value, tags, MetricType::Counter);
    }

    pub fn gauge(&self, metric: &str, value: f64, tags: BTreeMap<String, String>) {
        self.record(metric, value, tags, MetricType::Gauge);
    }

    pub fn histogram(&self, metric: &str, value: f64, tags: BTreeMap<String, String>) {
        self.record(metric, value, tags, MetricType::Histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn aggregation_key_is_stable_regardless_of_insertion_order() {
        let a = aggregation_key("search.latency", &tags(&[("repo", "x"), ("stage", "bm25")]));
        let b = aggregation_key("search.latency", &tags(&[("stage", "bm25"), ("repo", "x")]));
        assert_eq!(a, b);
    }

    #[test]
    fn counter_accumulates() {
        let agg = Aggregator::default();
        let event = |v: f64| MetricEvent {
            metric: "requests".into(),
            value: v,
            tags: tags(&[]),
            timestamp: chrono::Utc::now(),
            corr_id: None,
            metric_type: MetricType::Counter,
        };
        agg.record(&event(1.0));
        agg.record(&event(2.0));
        assert_eq!(agg.counter("requests", &tags(&[])), Some(3.0));
    }

    #[test]
    fn gauge_keeps_last_write() {
        let agg = Aggregator::default();
        let event = |v: f64| MetricEvent {
            metric: "active".into(),
            value: v,
            tags: tags(&[]),
            timestamp: chrono::Utc::now(),
            corr_id: None,
            metric_type: MetricType::Gauge,
        };
        agg.record(&event(5.0));
        agg.record(&event(2.0));
        assert_eq!(agg.gauge("active", &tags(&[])), Some(2.0));
    }

    #[test]
    fn histogram_tracks_count_sum_min_max_avg() {
        let agg = Aggregator::default();
        let event = |v: f64| MetricEvent {
            metric: "latency".into(),
            value: v,
            tags: tags(&[]),
            timestamp: chrono::Utc::now(),
            corr_id: None,
            metric_type: MetricType::Histogram,
        };
        for v in [10.0, 20.0, 30.0] {
            agg.record(&event(v));
        }
        let snap = agg.histogram("latency", &tags(&[])).unwrap();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.sum, 60.0);
        assert_eq!(snap.min, 10.0);
        assert_eq!(snap.max, 30.0);
        assert!((snap.avg - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sampler_at_zero_never_fires() {
        let sampler = Sampler::new(0.0);
        for _ in 0..10 {
            assert!(!sampler.should_emit());
        }
    }

    #[test]
    fn sampler_at_one_always_fires() {
        let sampler = Sampler::new(1.0);
        for _ in 0..10 {
            assert!(sampler.should_emit());
        }
    }

    #[test]
    fn sampler_at_half_fires_half_the_calls() {
        let sampler = Sampler::new(0.5);
        let fired = (0..10).filter(|_| sampler.should_emit()).count();
        assert_eq!(fired, 5);
    }

    #[tokio::test]
    async fn collector_updates_aggregator_even_when_unsampled() {
        let collector = MetricsCollector::new(vec![], 0.0);
        collector.counter("x", 1.0, tags(&[]));
        collector.counter("x", 1.0, tags(&[]));
        assert_eq!(collector.aggregator().counter("x", &tags(&[])), Some(2.0));
    }
}
