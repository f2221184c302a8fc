//! Correlated structured logging. Every logger is scoped to a component
//! name; every emitted event carries the current task-local correlation id
//! (if any). Emission goes through `tracing`'s macros — verbosity filtering,
//! text/JSON rendering and the output sink are owned by whatever
//! `tracing_subscriber` layer the process installs via `init_subscriber`,
//! not by this module.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use pampax_core::config::{LogFormat, LoggingConfig};
use pampax_core::error::{ConfigError, PampaxError, PampaxResult};
use pampax_core::identity::Timestamp;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Log severity. Ordered so a logger can pre-filter by `level >= min_level`
/// before handing off to `tracing`, whose own `EnvFilter` makes the final
/// call at the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A fully resolved log record. Used only for the error-history ring buffer
/// (§4.12) — the live log stream itself is rendered by whatever
/// `tracing_subscriber` layer `init_subscriber` installed.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub time: Timestamp,
    pub level: Level,
    pub component: String,
    pub op: String,
    pub msg: String,
    pub corr_id: Option<String>,
    pub status: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Builder for a single log call: lets callers attach `status`,
/// `duration_ms`, `error` and arbitrary extra fields before emitting.
#[derive(Default)]
pub struct LogFields {
    pub status: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogFields {
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Installs a process-wide `tracing_subscriber::fmt` subscriber honoring
/// `[logging]`'s `level` and `format`. `EnvFilter` drives verbosity, so
/// `RUST_LOG` still overrides the configured level at runtime the way
/// `tracing-subscriber` users expect; `format` selects the json vs text
/// formatter. Safe to call more than once (e.g. once per test binary) —
/// only the first call installs a subscriber, later calls are a no-op.
pub fn init_subscriber(config: &LoggingConfig) -> PampaxResult<()> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| {
        PampaxError::Config(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            value: config.level.clone(),
            reason: e.to_string(),
        })
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    Ok(())
}

/// A component-scoped logger. Cheap to clone; `child` derives a nested
/// logger that inherits level/history settings.
#[derive(Clone)]
pub struct Logger {
    component: String,
    min_level: Level,
    history: Option<std::sync::Arc<Mutex<VecDeque<LogEvent>>>>,
    history_capacity: usize,
}

impl Logger {
    pub fn new(component: impl Into<String>, min_level: Level) -> Self {
        Self {
            component: component.into(),
            min_level,
            history: None,
            history_capacity: 0,
        }
    }

    /// Retain the last `capacity` ERROR-level events in a ring buffer,
    /// inspectable via `error_history`.
    pub fn with_error_history(mut self, capacity: usize) -> Self {
        self.history = Some(std::sync::Arc::new(Mutex::new(VecDeque::with_capacity(capacity))));
        self.history_capacity = capacity;
        self
    }

    pub fn child(&self, sub_component: impl std::fmt::Display) -> Self {
        Self {
            component: format!("{}.{}", self.component, sub_component),
            min_level: self.min_level,
            history: self.history.clone(),
            history_capacity: self.history_capacity,
        }
    }

    fn log(&self, level: Level, op: &str, msg: impl Into<String>, fields: LogFields) {
        if level < self.min_level {
            return;
        }

        let msg = msg.into();
        let corr_id = crate::correlation::current_correlation_id();
        let component = self.component.as_str();

        macro_rules! emit {
            ($macro_name:ident) => {
                tracing::$macro_name!(
                    component,
                    op,
                    corr_id = ?corr_id,
                    status = ?fields.status,
                    duration_ms = ?fields.duration_ms,
                    error = ?fields.error,
                    extra = ?fields.extra,
                    "{}", msg
                )
            };
        }

        match level {
            Level::Trace => emit!(trace),
            Level::Debug => emit!(debug),
            Level::Info => emit!(info),
            Level::Warn => emit!(warn),
            Level::Error => emit!(error),
        }

        if level == Level::Error {
            if let Some(history) = &self.history {
                let event = LogEvent {
                    time: chrono::Utc::now(),
                    level,
                    component: self.component.clone(),
                    op: op.to_string(),
                    msg,
                    corr_id,
                    status: fields.status,
                    duration_ms: fields.duration_ms,
                    error: fields.error,
                    extra: fields.extra,
                };
                let mut history = history.lock().unwrap();
                if history.len() >= self.history_capacity.max(1) {
                    history.pop_front();
                }
                history.push_back(event);
            }
        }
    }

    pub fn trace(&self, op: &str, msg: impl Into<String>, fields: LogFields) {
        self.log(Level::Trace, op, msg, fields);
    }

    pub fn debug(&self, op: &str, msg: impl Into<String>, fields: LogFields) {
        self.log(Level::Debug, op, msg, fields);
    }

    pub fn info(&self, op: &str, msg: impl Into<String>, fields: LogFields) {
        self.log(Level::Info, op, msg, fields);
    }

    pub fn warn(&self, op: &str, msg: impl Into<String>, fields: LogFields) {
        self.log(Level::Warn, op, msg, fields);
    }

    pub fn error(&self, op: &str, msg: impl Into<String>, fields: LogFields) {
        self.log(Level::Error, op, msg, fields);
    }

    pub fn error_history(&self) -> Vec<LogEvent> {
        self.history
            .as_ref()
            .map(|h| h.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }
}
