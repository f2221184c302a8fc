//! Error hierarchy for the PAMPAX pipeline.
//!
//! Each pipeline stage gets a focused error enum; `PampaxError` composes
//! them via `#[from]` so call sites can use `?` without manual wrapping.

use thiserror::Error;

/// Errors from the namespaced LRU+TTL cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend failure in scope '{scope}': {reason}")]
    BackendFailure { scope: String, reason: String },

    #[error("malformed cache key: {key}")]
    InvalidKey { key: String },

    #[error("cache scope '{scope}' exceeds configured capacity")]
    CapacityExceeded { scope: String },
}

/// Errors from individual hybrid-retrieval sub-retrievers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("retrieval source '{source}' failed: {reason}")]
    SourceFailed { source: String, reason: String },

    #[error("all retrieval sources failed for query")]
    AllSourcesFailed,

    #[error("retrieval source '{source}' timed out after {elapsed_ms}ms")]
    SourceTimedOut { source: String, elapsed_ms: u64 },
}

/// Errors from the graph BFS expander's edge storage access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph storage failure: {reason}")]
    StorageFailure { reason: String },

    #[error("graph expansion exceeded bound: {bound}")]
    BoundExceeded { bound: String },
}

/// Errors from reranker providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RerankError {
    #[error("reranker provider '{provider}' failed: {reason}")]
    ProviderFailed { provider: String, reason: String },

    #[error("all reranker providers failed, including fallback")]
    AllProvidersFailed,

    #[error("unknown reranker provider alias: {alias}")]
    UnknownProvider { alias: String },
}

/// Errors from loading or validating the effective configuration object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid value for '{field}': {reason} (got: {value})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("incompatible config options: {reason}")]
    IncompatibleOptions { reason: String },
}

/// Errors from policy-gate validation of an assembled `PolicyDecision`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy decision rejected: {reason}")]
    Rejected { reason: String },

    #[error("unknown intent label: {label}")]
    UnknownIntent { label: String },
}

/// Master error type threaded through the pipeline.
#[derive(Debug, Clone, Error)]
pub enum PampaxError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("rerank error: {0}")]
    Rerank(#[from] RerankError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("operation '{operation}' exceeded deadline of {deadline_ms}ms")]
    Timeout { operation: String, deadline_ms: u64 },

    #[error("invalid chunk or bundle data: {0}")]
    InvalidData(String),
}

/// Result alias used throughout the PAMPAX crates.
pub type PampaxResult<T> = Result<T, PampaxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_converts_into_pampax_error() {
        let err: PampaxError = CacheError::InvalidKey {
            key: "bad-key".into(),
        }
        .into();
        assert!(matches!(err, PampaxError::Cache(CacheError::InvalidKey { .. })));
    }

    #[test]
    fn retrieval_error_message_includes_source() {
        let err = RetrievalError::SourceFailed {
            source: "vector".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("vector"));
    }

    #[test]
    fn all_sources_failed_has_no_reason_field() {
        let err = RetrievalError::AllSourcesFailed;
        assert_eq!(err.to_string(), "all retrieval sources failed for query");
    }

    #[test]
    fn config_invalid_value_reports_field_and_value() {
        let err = ConfigError::InvalidValue {
            field: "cache.max_size".into(),
            value: "-1".into(),
            reason: "must be positive".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache.max_size"));
        assert!(msg.contains("-1"));
    }

    #[test]
    fn timeout_error_is_distinguishable() {
        let err = PampaxError::Timeout {
            operation: "hybrid_retrieve".into(),
            deadline_ms: 250,
        };
        assert!(matches!(err, PampaxError::Timeout { .. }));
    }
}
