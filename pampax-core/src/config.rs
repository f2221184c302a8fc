//! Effective configuration object read by the core.
//!
//! Loading the TOML file and applying `PAMPAX_{SECTION}_{KEY}` environment
//! overrides is an external collaborator's job; this module only defines
//! the shape the core consumes and the validation it performs on it.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PampaxError, PampaxResult};

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub structured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File,
}

/// `[metrics]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub sink: MetricsSink,
    /// Fraction of metric emissions to keep, in `[0, 1]`.
    pub sampling_rate: f32,
    pub export_interval_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsSink {
    Stdout,
    Stderr,
    Prometheus,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_size_mb: u32,
}

/// `[performance]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub query_timeout_ms: u64,
    pub max_concurrent_searches: u32,
    pub sqlite_cache_size: u32,
    pub memory_limit_mb: u32,
}

/// `[indexer]` section. The indexer itself lives outside the core; this is
/// only the subset of its configuration the core reads back (e.g. for
/// explanation output).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub follow_symlinks: bool,
    pub respect_gitignore: bool,
}

/// The full effective configuration object. Every field is required; there
/// are no implicit defaults here; callers load from TOML (plus env
/// overrides) externally and hand the core this already-resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PampaxConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub cache: CacheConfig,
    pub performance: PerformanceConfig,
    pub indexer: IndexerConfig,
    /// Token budget for the assembled bundle; not part of the TOML file's
    /// fixed sections, but still a required effective-config field.
    pub token_budget: u32,
}

impl PampaxConfig {
    /// Reasonable defaults matching the documented TOML file, useful for
    /// tests and for constructing a config outside of the external loader.
    pub fn with_defaults(token_budget: u32) -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
                output: LogOutput::Stdout,
                structured: true,
            },
            metrics: MetricsConfig {
                enabled: true,
                sink: MetricsSink::Stdout,
                sampling_rate: 1.0,
                export_interval_seconds: 60,
            },
            cache: CacheConfig {
                enabled: true,
                ttl_seconds: 3600,
                max_size_mb: 500,
            },
            performance: PerformanceConfig {
                query_timeout_ms: 5000,
                max_concurrent_searches: 10,
                sqlite_cache_size: 8000,
                memory_limit_mb: 4096,
            },
            indexer: IndexerConfig {
                follow_symlinks: false,
                respect_gitignore: true,
                ..Default::default()
            },
            token_budget,
        }
    }

    /// Validate the effective config. A validation failure must never
    /// panic the core; callers fall back to defaults or surface the error
    /// via the loader, per the config-validation-failure disposition.
    pub fn validate(&self) -> PampaxResult<()> {
        if self.token_budget == 0 {
            return Err(PampaxError::Config(ConfigError::InvalidValue {
                field: "token_budget".to_string(),
                value: self.token_budget.to_string(),
                reason: "token_budget must be greater than 0".to_string(),
            }));
        }

        if !(0.0..=1.0).contains(&self.metrics.sampling_rate) {
            return Err(PampaxError::Config(ConfigError::InvalidValue {
                field: "metrics.sampling_rate".to_string(),
                value: self.metrics.sampling_rate.to_string(),
                reason: "sampling_rate must be in [0, 1]".to_string(),
            }));
        }

        if self.cache.enabled && self.cache.max_size_mb == 0 {
            return Err(PampaxError::Config(ConfigError::InvalidValue {
                field: "cache.max_size_mb".to_string(),
                value: self.cache.max_size_mb.to_string(),
                reason: "max_size_mb must be greater than 0 when cache is enabled".to_string(),
            }));
        }

        if self.performance.query_timeout_ms == 0 {
            return Err(PampaxError::Config(ConfigError::InvalidValue {
                field: "performance.query_timeout_ms".to_string(),
                value: self.performance.query_timeout_ms.to_string(),
                reason: "query_timeout_ms must be greater than 0".to_string(),
            }));
        }

        if self.performance.max_concurrent_searches == 0 {
            return Err(PampaxError::Config(ConfigError::InvalidValue {
                field: "performance.max_concurrent_searches".to_string(),
                value: self.performance.max_concurrent_searches.to_string(),
                reason: "max_concurrent_searches must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

/// Convenience defaults overridable via `PAMPAX_DEFAULTS_*` env vars, for
/// callers that need sensible numbers before a config file is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PampaxDefaults {
    pub token_budget: u32,
    pub cache_hit_threshold: f32,
    pub degrade_quality_threshold: f32,
}

impl Default for PampaxDefaults {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            cache_hit_threshold: 0.8,
            degrade_quality_threshold: 0.5,
        }
    }
}

impl PampaxDefaults {
    /// Build from environment variables, falling back to `Default` for any
    /// unset or unparseable value.
    ///
    /// - `PAMPAX_DEFAULTS_TOKEN_BUDGET`
    /// - `PAMPAX_DEFAULTS_CACHE_HIT_THRESHOLD`
    /// - `PAMPAX_DEFAULTS_DEGRADE_QUALITY_THRESHOLD`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_budget: std::env::var("PAMPAX_DEFAULTS_TOKEN_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.token_budget),
            cache_hit_threshold: std::env::var("PAMPAX_DEFAULTS_CACHE_HIT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_hit_threshold),
            degrade_quality_threshold: std::env::var("PAMPAX_DEFAULTS_DEGRADE_QUALITY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.degrade_quality_threshold),
        }
    }
}
