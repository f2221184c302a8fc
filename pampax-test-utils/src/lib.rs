//! PAMPAX Test Utilities
//!
//! Centralized test infrastructure for the PAMPAX workspace:
//! - Proptest generators for every core entity type
//! - Test fixtures for common retrieval/policy/degrade scenarios
//! - Custom assertions for PAMPAX-specific invariants

// Re-export the in-memory storage backend from its source crate.
pub use pampax_cache::storage::MockStorageBackend;

// Re-export core types for convenience.
pub use pampax_core::{
    compute_content_hash, Bundle, CacheEntry, CacheKey, Chunk, Edge, EdgeType, EntityIdType,
    EntityKind, Explanation, ExtractedEntity, Intent, IntentResult, MatchSource, PampaxConfig,
    PampaxError, PampaxResult, PolicyDecision, SearchResult, SearchResultMetadata, Severity,
    SpanKind, StoppingCondition, StoppingConditionType,
    // Strongly-typed entity IDs
    ChunkId, RepositoryId,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating PAMPAX entity types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    // === Identity Type Generators ===

    /// Generate a random UUID (for generic ID generation).
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a valid UUIDv7 (timestamp-sortable).
    pub fn arb_uuid_v7() -> impl Strategy<Value = Uuid> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a random ChunkId.
    pub fn arb_chunk_id() -> impl Strategy<Value = ChunkId> {
        arb_uuid().prop_map(ChunkId::new)
    }

    /// Generate a random RepositoryId.
    pub fn arb_repository_id() -> impl Strategy<Value = RepositoryId> {
        arb_uuid().prop_map(RepositoryId::new)
    }

    /// Generate a SymbolId: a dotted path resembling `module.Type.method`.
    pub fn arb_symbol_id() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{2,10}(\\.[A-Z][a-zA-Z]{2,10}){0,2}".prop_map(|s| s)
    }

    // === Enum Generators ===

    /// Generate a SpanKind variant.
    pub fn arb_span_kind() -> impl Strategy<Value = SpanKind> {
        prop_oneof![
            Just(SpanKind::Function),
            Just(SpanKind::Class),
            Just(SpanKind::Test),
            Just(SpanKind::Comment),
            Just(SpanKind::Config),
            Just(SpanKind::Other),
        ]
    }

    /// Generate an EdgeType variant.
    pub fn arb_edge_type() -> impl Strategy<Value = EdgeType> {
        prop_oneof![
            Just(EdgeType::Uses),
            Just(EdgeType::Calls),
            Just(EdgeType::Implements),
            Just(EdgeType::Configures),
            Just(EdgeType::Manages),
            Just(EdgeType::Imports),
            Just(EdgeType::References),
            Just(EdgeType::Defines),
        ]
    }

    /// Generate a MatchSource variant.
    pub fn arb_match_source() -> impl Strategy<Value = MatchSource> {
        prop_oneof![
            Just(MatchSource::Bm25),
            Just(MatchSource::Vector),
            Just(MatchSource::Memory),
            Just(MatchSource::Symbol),
            Just(MatchSource::Graph),
        ]
    }

    /// Generate an Intent variant.
    pub fn arb_intent() -> impl Strategy<Value = Intent> {
        prop_oneof![
            Just(Intent::Symbol),
            Just(Intent::Config),
            Just(Intent::Api),
            Just(Intent::Incident),
            Just(Intent::Search),
        ]
    }

    /// Generate an EntityKind variant.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::Function),
            Just(EntityKind::Class),
            Just(EntityKind::File),
            Just(EntityKind::Route),
            Just(EntityKind::Error),
            Just(EntityKind::Other),
        ]
    }

    /// Generate a StoppingConditionType variant.
    pub fn arb_stopping_condition_type() -> impl Strategy<Value = StoppingConditionType> {
        prop_oneof![
            Just(StoppingConditionType::BudgetExhausted),
            Just(StoppingConditionType::BudgetWarning),
            Just(StoppingConditionType::ResultLimit),
            Just(StoppingConditionType::QualityThreshold),
            Just(StoppingConditionType::SearchFailure),
            Just(StoppingConditionType::CacheBoundary),
            Just(StoppingConditionType::LowCacheHitRate),
            Just(StoppingConditionType::GraphTraversalLimit),
            Just(StoppingConditionType::Timeout),
            Just(StoppingConditionType::DegradationTriggered),
        ]
    }

    // === Struct Generators ===

    /// Generate a Chunk with consistent content/hash/token_count.
    pub fn arb_chunk() -> impl Strategy<Value = Chunk> {
        (
            arb_chunk_id(),
            arb_repository_id(),
            "src/[a-z_]{3,12}\\.rs".prop_map(|s| s),
            1u32..500,
            arb_span_kind(),
            "[a-zA-Z0-9_ (){}\n]{10,200}".prop_map(|s| s),
        )
            .prop_map(|(id, repository_id, file_path, start_line, span_kind, content)| {
                let content_hash = compute_content_hash(content.as_bytes());
                let token_count = (content.chars().count() as u32 / 4).max(1);
                Chunk {
                    id,
                    repository_id,
                    file_path,
                    start_byte: 0,
                    end_byte: content.len() as u32,
                    start_line,
                    end_line: start_line + 10,
                    language: "rust".to_string(),
                    content,
                    content_hash,
                    span_kind,
                    token_count,
                }
            })
    }

    /// Generate an Edge between two symbol ids.
    pub fn arb_edge() -> impl Strategy<Value = Edge> {
        (arb_symbol_id(), arb_symbol_id(), arb_edge_type(), 0.0f32..1.0f32).prop_map(
            |(from_symbol, to_symbol, edge_type, confidence)| Edge { from_symbol, to_symbol, edge_type, confidence },
        )
    }

    /// Generate an ExtractedEntity.
    pub fn arb_extracted_entity() -> impl Strategy<Value = ExtractedEntity> {
        ("[a-zA-Z_][a-zA-Z0-9_]{2,20}".prop_map(|s| s), arb_entity_kind())
            .prop_map(|(text, kind)| ExtractedEntity { text, kind })
    }

    /// Generate an IntentResult with zero to three extracted entities.
    pub fn arb_intent_result() -> impl Strategy<Value = IntentResult> {
        (arb_intent(), 0.0f32..1.0f32, prop::collection::vec(arb_extracted_entity(), 0..3)).prop_map(
            |(intent, confidence, entities)| IntentResult { intent, confidence, entities, suggested_policies: Vec::new() },
        )
    }

    /// Generate a SearchResultMetadata.
    pub fn arb_search_result_metadata() -> impl Strategy<Value = SearchResultMetadata> {
        (prop::option::of("[a-zA-Z_][a-zA-Z0-9_]{2,20}".prop_map(|s| s)), prop::collection::vec(arb_match_source(), 0..3))
            .prop_map(|(span_name, match_sources)| SearchResultMetadata { span_name, match_sources })
    }

    /// Generate a SearchResult.
    pub fn arb_search_result() -> impl Strategy<Value = SearchResult> {
        (
            arb_chunk_id(),
            "src/[a-z_]{3,12}\\.rs".prop_map(|s| s),
            "[a-zA-Z0-9_ (){}\n]{10,200}".prop_map(|s| s),
            0.0f32..1.0f32,
            arb_span_kind(),
            arb_search_result_metadata(),
        )
            .prop_map(|(id, path, content, score, span_kind, metadata)| SearchResult {
                id,
                path,
                content,
                score,
                span_kind,
                metadata,
                fused_score: None,
                relevance_score: None,
            })
    }

    /// Generate a PolicyDecision with depth/threshold bounds matching the
    /// gate's documented ranges.
    pub fn arb_policy_decision() -> impl Strategy<Value = PolicyDecision> {
        (1u8..=10, any::<bool>(), any::<bool>(), any::<bool>(), 1u8..=50).prop_map(
            |(max_depth, include_symbols, include_files, include_content, early_stop_threshold)| PolicyDecision {
                max_depth,
                include_symbols,
                include_files,
                include_content,
                early_stop_threshold,
                seed_weights: HashMap::new(),
            },
        )
    }

    /// Generate a StoppingCondition with a random type, explanation, and a
    /// severity derived from the type (never an inconsistent pairing).
    pub fn arb_stopping_condition() -> impl Strategy<Value = StoppingCondition> {
        (arb_stopping_condition_type(), "[a-z_]{3,15}".prop_map(|s| s), "[a-zA-Z0-9 ]{5,80}".prop_map(|s| s)).prop_map(
            |(condition_type, source, explanation)| StoppingCondition::new(condition_type, source, explanation),
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Create a minimal valid PampaxConfig for testing.
    pub fn minimal_config() -> PampaxConfig {
        PampaxConfig::with_defaults(8000)
    }

    /// Create a Chunk for a given repository, with a deterministic
    /// content hash.
    pub fn test_chunk(repository_id: RepositoryId, path: &str, content: &str) -> Chunk {
        let content = content.to_string();
        let content_hash = compute_content_hash(content.as_bytes());
        Chunk {
            id: ChunkId::now_v7(),
            repository_id,
            file_path: path.to_string(),
            start_byte: 0,
            end_byte: content.len() as u32,
            start_line: 1,
            end_line: content.lines().count().max(1) as u32,
            language: "rust".to_string(),
            content,
            content_hash,
            span_kind: SpanKind::Function,
            token_count: 20,
        }
    }

    /// Create a SearchResult backed by `test_chunk`'s content shape.
    pub fn test_search_result(path: &str, content: &str, score: f32) -> SearchResult {
        SearchResult {
            id: ChunkId::now_v7(),
            path: path.to_string(),
            content: content.to_string(),
            score,
            span_kind: SpanKind::Function,
            metadata: SearchResultMetadata { span_name: Some(path.trim_end_matches(".rs").to_string()), match_sources: vec![MatchSource::Bm25] },
            fused_score: None,
            relevance_score: None,
        }
    }

    /// Create `n` descending-score search results named `handler_0..handler_n`.
    pub fn ranked_search_results(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| test_search_result(&format!("src/handler_{i}.rs"), &format!("fn handler_{i}() {{}}"), 1.0 - (i as f32 * 0.05)))
            .collect()
    }

    /// Create an Edge linking `from` to `to` via `Calls`, at full confidence.
    pub fn calls_edge(from: &str, to: &str) -> Edge {
        Edge { from_symbol: from.to_string(), to_symbol: to.to_string(), edge_type: EdgeType::Calls, confidence: 1.0 }
    }

    /// Build an `IntentResult` with a single named intent and no entities,
    /// matching the classifier's `uncertain()` shape but with a caller-picked
    /// intent and confidence.
    pub fn intent_result(intent: Intent, confidence: f32) -> IntentResult {
        IntentResult { intent, confidence, entities: Vec::new(), suggested_policies: Vec::new() }
    }

    /// A generous `PolicyDecision` that includes everything and rarely
    /// triggers early stopping — useful as a baseline before narrowing
    /// fields in a specific test.
    pub fn permissive_policy() -> PolicyDecision {
        PolicyDecision {
            max_depth: 3,
            include_symbols: true,
            include_files: true,
            include_content: true,
            early_stop_threshold: 50,
            seed_weights: std::collections::HashMap::new(),
        }
    }

    /// An empty `Bundle` at the given budget, useful as a baseline before
    /// filling in `results`/`tokens_used` in a specific test.
    pub fn empty_bundle(budget: u32) -> Bundle {
        Bundle {
            query: String::new(),
            results: Vec::new(),
            explanation: Explanation::default(),
            tokens_used: 0,
            budget,
            correlation_id: uuid::Uuid::now_v7().to_string(),
            truncated: false,
            performance_ms: 0,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for PAMPAX-specific invariants.

    use super::*;

    /// Assert that a PampaxResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &PampaxResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a PampaxResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &PampaxResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a PampaxResult is a Cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &PampaxResult<T>) {
        match result {
            Err(PampaxError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that a PampaxResult is a Retrieval error.
    #[track_caller]
    pub fn assert_retrieval_error<T: std::fmt::Debug>(result: &PampaxResult<T>) {
        match result {
            Err(PampaxError::Retrieval(_)) => {}
            other => panic!("Expected Retrieval error, got: {:?}", other),
        }
    }

    /// Assert that a PampaxResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &PampaxResult<T>) {
        match result {
            Err(PampaxError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a Bundle satisfies its core budget invariant.
    #[track_caller]
    pub fn assert_within_budget(bundle: &Bundle) {
        assert!(bundle.within_budget(), "tokens_used {} exceeds budget {}", bundle.tokens_used, bundle.budget);
    }

    /// Assert that a PampaxConfig passes its own validation.
    #[track_caller]
    pub fn assert_config_valid(config: &PampaxConfig) {
        match config.validate() {
            Ok(()) => {}
            Err(e) => panic!("Config validation failed: {:?}", e),
        }
    }

    /// Assert that two search results are ordered by non-increasing score.
    #[track_caller]
    pub fn assert_sorted_by_score_desc(results: &[SearchResult]) {
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score, "results not sorted by descending score: {} then {}", pair[0].score, pair[1].score);
        }
    }

    /// Assert that every result in `results` carries at least one of the
    /// expected match sources.
    #[track_caller]
    pub fn assert_results_tagged_with(results: &[SearchResult], expected: MatchSource) {
        for result in results {
            assert!(
                result.metadata.match_sources.contains(&expected),
                "result {:?} missing expected match source {:?}",
                result.path,
                expected
            );
        }
    }

    /// Assert that a stopping condition's severity matches the fixed table
    /// for its type.
    #[track_caller]
    pub fn assert_stopping_condition_severity(condition: &StoppingCondition) {
        assert_eq!(
            condition.severity,
            condition.condition_type.severity(),
            "stopping condition {:?} recorded with wrong severity",
            condition.condition_type
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn minimal_config_is_valid() {
        let config = fixtures::minimal_config();
        assertions::assert_config_valid(&config);
    }

    #[test]
    fn ranked_search_results_fixture_is_sorted() {
        let results = fixtures::ranked_search_results(5);
        assertions::assert_sorted_by_score_desc(&results);
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn empty_bundle_fixture_respects_budget_trivially() {
        let bundle = fixtures::empty_bundle(1000);
        assertions::assert_within_budget(&bundle);
    }

    #[test]
    fn test_chunk_fixture_hashes_its_own_content() {
        let chunk = fixtures::test_chunk(RepositoryId::now_v7(), "src/lib.rs", "fn main() {}");
        assert_eq!(chunk.content_hash, compute_content_hash(b"fn main() {}"));
    }

    #[test]
    fn permissive_policy_includes_everything() {
        let policy = fixtures::permissive_policy();
        assert!(policy.include_symbols && policy.include_files && policy.include_content);
    }

    #[test]
    fn calls_edge_fixture_has_expected_type() {
        let edge = fixtures::calls_edge("UserService", "DatabaseService");
        assert_eq!(edge.edge_type, EdgeType::Calls);
        assert_eq!(edge.confidence, 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_chunk_has_consistent_hash(chunk in generators::arb_chunk()) {
            prop_assert_eq!(&chunk.content_hash, &compute_content_hash(chunk.content.as_bytes()));
        }

        #[test]
        fn prop_generated_search_result_score_in_range(result in generators::arb_search_result()) {
            prop_assert!(result.score >= 0.0 && result.score <= 1.0);
        }

        #[test]
        fn prop_generated_policy_decision_within_documented_bounds(policy in generators::arb_policy_decision()) {
            prop_assert!((1..=10).contains(&policy.max_depth));
            prop_assert!((1..=50).contains(&policy.early_stop_threshold));
        }

        #[test]
        fn prop_generated_stopping_condition_matches_severity_table(condition in generators::arb_stopping_condition()) {
            assertions::assert_stopping_condition_severity(&condition);
        }

        #[test]
        fn prop_generated_edge_confidence_in_range(edge in generators::arb_edge()) {
            prop_assert!(edge.confidence >= 0.0 && edge.confidence <= 1.0);
        }

        #[test]
        fn prop_generated_intent_result_confidence_in_range(result in generators::arb_intent_result()) {
            prop_assert!(result.confidence >= 0.0 && result.confidence <= 1.0);
        }
    }
}
