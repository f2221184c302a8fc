//! Core data model shared across the PAMPAX pipeline: chunks, edges, search
//! results, bundles, cache entries/keys, and the intent/policy/stopping
//! records that flow between pipeline stages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::{compute_content_hash, short_hash, ChunkId, RepositoryId, SymbolId, Timestamp};

/// Coarse category of a code span, set by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Function,
    Class,
    Test,
    Comment,
    Config,
    Other,
}

/// An indexed code span. Read-only from the core's perspective; the indexer
/// owns creation and content hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub repository_id: RepositoryId,
    pub file_path: String,
    pub start_byte: u32,
    pub end_byte: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    pub content: String,
    pub content_hash: String,
    pub span_kind: SpanKind,
    pub token_count: u32,
}

impl Chunk {
    /// Recompute `content_hash` from `content`; the indexer is expected to
    /// call this once at creation time, but it stays idempotent so tests
    /// and cache-key derivation can rely on it without indexer access.
    pub fn rehash(&mut self) {
        self.content_hash = compute_content_hash(self.content.as_bytes());
    }
}

/// The relationship kinds the indexer can record between two symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Uses,
    Calls,
    Implements,
    Configures,
    Manages,
    Imports,
    References,
    Defines,
}

/// Directed, typed relationship between two symbol ids. Indexer-owned and
/// read-only in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_symbol: SymbolId,
    pub to_symbol: SymbolId,
    pub edge_type: EdgeType,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Tag identifying which sub-retriever produced a `SearchResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Bm25,
    Vector,
    Memory,
    Symbol,
    Graph,
}

/// Per-result metadata carried alongside the raw score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResultMetadata {
    pub span_name: Option<String>,
    pub match_sources: Vec<MatchSource>,
}

/// A single retrieval hit. Shared by all four sub-retrievers; mutated only
/// by fusion/rerank stages adding scores, never by rewriting identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub path: String,
    pub content: String,
    pub score: f32,
    pub span_kind: SpanKind,
    pub metadata: SearchResultMetadata,
    /// Reciprocal-rank-fusion score, set once the reranker has run.
    pub fused_score: Option<f32>,
    /// Cross-encoder / API relevance score, when a reranker provider ran.
    pub relevance_score: Option<f32>,
}

impl SearchResult {
    /// Dedup key per the hybrid retriever's contract: `(repo, path, span_id
    /// or content hash)`. Repo is carried by the caller's scoping, so this
    /// returns the `(path, disambiguator)` half of that key.
    pub fn dedup_key(&self) -> (String, String) {
        (self.path.clone(), self.id.to_string())
    }
}

/// A structured explanation attached to a `Bundle`, recording the decisions
/// made while assembling it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub policy: Option<PolicyDecision>,
    pub retrievers_used: Vec<MatchSource>,
    pub stopping_conditions: Vec<StoppingCondition>,
    pub errors: Vec<String>,
}

/// The final, token-budgeted, possibly-degraded ordered set of results
/// returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub explanation: Explanation,
    pub tokens_used: u32,
    pub budget: u32,
    pub correlation_id: String,
    pub truncated: bool,
    pub performance_ms: u64,
}

impl Bundle {
    /// `tokens_used <= budget` is the core bundle invariant; callers that
    /// build a `Bundle` by hand should assert this before returning it.
    pub fn within_budget(&self) -> bool {
        self.tokens_used <= self.budget
    }
}

/// A cached value plus the bookkeeping the namespaced cache needs for TTL
/// and LRU accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Timestamp,
    pub last_accessed: Timestamp,
    pub size_estimate: usize,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Current cache key format version. Bumping this invalidates every
/// existing key atomically, since `CacheKey::generate` embeds it.
pub const CACHE_KEY_VERSION: u32 = 1;

/// Canonical cache key: `"v{VERSION}:{scope}:{16-hex-hash}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from a scope name and a JSON-serializable input object.
    /// The object is canonicalized (keys sorted, nulls dropped) before
    /// hashing so that equivalent inputs always produce the same key.
    pub fn generate<T: Serialize>(scope: &str, inputs: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(inputs)?;
        let canonical = canonicalize_json(&value);
        let bytes = serde_json::to_vec(&canonical)?;
        let hash = short_hash(&compute_content_hash(&bytes));
        Ok(Self(format!("v{CACHE_KEY_VERSION}:{scope}:{hash}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a key back into its `{version, scope, hash}` parts.
    pub fn parse(raw: &str) -> Option<ParsedCacheKey> {
        let mut parts = raw.splitn(3, ':');
        let version_part = parts.next()?;
        let scope = parts.next()?;
        let hash = parts.next()?;
        let version = version_part.strip_prefix('v')?.parse::<u32>().ok()?;
        Some(ParsedCacheKey {
            version,
            scope: scope.to_string(),
            hash: hash.to_string(),
        })
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The decomposed parts of a parsed `CacheKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCacheKey {
    pub version: u32,
    pub scope: String,
    pub hash: String,
}

/// Sort object keys and drop nulls, recursively, so that two
/// field-reordered or null-padded inputs hash identically.
fn canonicalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), canonicalize_json(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_json).collect())
        }
        other => other.clone(),
    }
}

/// Coarse query intent label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Symbol,
    Config,
    Api,
    Incident,
    Search,
}

/// Entity kind tagged on tokens extracted from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Class,
    File,
    Route,
    Error,
    Other,
}

/// A single entity extracted from a query by the intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub text: String,
    pub kind: EntityKind,
}

/// The intent classifier's output: label, confidence, extracted entities,
/// and suggested policy adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub entities: Vec<ExtractedEntity>,
    pub suggested_policies: Vec<String>,
}

impl IntentResult {
    /// The contract's guaranteed fallback when the classifier is totally
    /// uncertain about a query.
    pub fn uncertain() -> Self {
        Self {
            intent: Intent::Search,
            confidence: 0.5,
            entities: Vec::new(),
            suggested_policies: Vec::new(),
        }
    }
}

/// Output of the policy gate: how deep/wide retrieval should go for a
/// given intent and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// In `[1, 10]`.
    pub max_depth: u8,
    pub include_symbols: bool,
    pub include_files: bool,
    pub include_content: bool,
    /// In `[1, 50]`.
    pub early_stop_threshold: u8,
    /// Per-edge-type weights in `[0, 5]`.
    pub seed_weights: HashMap<String, f32>,
}

/// A structured, explainable record of why the pipeline stopped early or
/// degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingConditionType {
    BudgetExhausted,
    BudgetWarning,
    ResultLimit,
    QualityThreshold,
    SearchFailure,
    CacheBoundary,
    LowCacheHitRate,
    GraphTraversalLimit,
    Timeout,
    DegradationTriggered,
}

/// How urgently a `StoppingCondition` should be surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl StoppingConditionType {
    /// Fixed severity per condition type, per the stopping-reason table.
    pub fn severity(self) -> Severity {
        match self {
            StoppingConditionType::BudgetExhausted
            | StoppingConditionType::SearchFailure
            | StoppingConditionType::Timeout => Severity::High,
            StoppingConditionType::CacheBoundary => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// A single recorded stopping condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoppingCondition {
    #[serde(rename = "type")]
    pub condition_type: StoppingConditionType,
    pub severity: Severity,
    pub category: String,
    pub source: String,
    pub values: HashMap<String, serde_json::Value>,
    pub timestamp: Timestamp,
    pub explanation: String,
    pub actionable: Vec<String>,
}

impl StoppingCondition {
    pub fn new(condition_type: StoppingConditionType, source: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            condition_type,
            severity: condition_type.severity(),
            category: format!("{condition_type:?}"),
            source: source.into(),
            values: HashMap::new(),
            timestamp: chrono::Utc::now(),
            explanation: explanation.into(),
            actionable: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_roundtrip_via_parse() {
        let key = CacheKey::generate("search", &serde_json::json!({"q": "foo", "budget": 4000})).unwrap();
        let parsed = CacheKey::parse(key.as_str()).expect("well-formed key should parse");
        assert_eq!(parsed.version, CACHE_KEY_VERSION);
        assert_eq!(parsed.scope, "search");
        assert_eq!(parsed.hash.len(), 16);
    }

    #[test]
    fn cache_key_is_stable_under_field_reordering() {
        let a = CacheKey::generate("search", &serde_json::json!({"a": 1, "b": 2})).unwrap();
        let b = CacheKey::generate("search", &serde_json::json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_drops_null_fields() {
        let a = CacheKey::generate("search", &serde_json::json!({"a": 1, "b": null})).unwrap();
        let b = CacheKey::generate("search", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_for_different_scope() {
        let a = CacheKey::generate("search", &serde_json::json!({"a": 1})).unwrap();
        let b = CacheKey::generate("bundle", &serde_json::json!({"a": 1})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn stopping_condition_severity_matches_table() {
        assert_eq!(StoppingConditionType::BudgetExhausted.severity(), Severity::High);
        assert_eq!(StoppingConditionType::SearchFailure.severity(), Severity::High);
        assert_eq!(StoppingConditionType::Timeout.severity(), Severity::High);
        assert_eq!(StoppingConditionType::CacheBoundary.severity(), Severity::Low);
        assert_eq!(StoppingConditionType::BudgetWarning.severity(), Severity::Medium);
        assert_eq!(StoppingConditionType::GraphTraversalLimit.severity(), Severity::Medium);
    }

    #[test]
    fn intent_result_uncertain_fallback_matches_contract() {
        let result = IntentResult::uncertain();
        assert_eq!(result.intent, Intent::Search);
        assert!((result.confidence - 0.5).abs() < f32::EPSILON);
        assert!(result.entities.is_empty());
    }

    #[test]
    fn bundle_within_budget_checks_invariant() {
        let bundle = Bundle {
            query: "q".into(),
            results: vec![],
            explanation: Explanation::default(),
            tokens_used: 100,
            budget: 200,
            correlation_id: "corr-1".into(),
            truncated: false,
            performance_ms: 5,
        };
        assert!(bundle.within_budget());
    }

    #[test]
    fn search_result_dedup_key_uses_path_and_id() {
        let result = SearchResult {
            id: ChunkId::now_v7(),
            path: "src/lib.rs".into(),
            content: "fn x() {}".into(),
            score: 0.5,
            span_kind: SpanKind::Function,
            metadata: SearchResultMetadata::default(),
            fused_score: None,
            relevance_score: None,
        };
        let (path, _) = result.dedup_key();
        assert_eq!(path, "src/lib.rs");
    }
}
