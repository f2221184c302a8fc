//! Orchestrates the full pipeline: classify intent, evaluate policy,
//! retrieve (read-through cache), optionally graph-expand, rerank, degrade
//! to budget, and emit a `Bundle` with its `Explanation`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use pampax_cache::cache::NamespacedCache;
use pampax_cache::storage::StorageBackend;
use pampax_core::error::PampaxResult;
use pampax_core::identity::SymbolId;
use pampax_core::model::{
    Bundle, CacheKey, Explanation, MatchSource, PolicyDecision, SearchResult, StoppingCondition, StoppingConditionType,
};
use pampax_policy::gate::{PolicyGate, PolicyOverride, SearchContext};
use pampax_policy::intent::IntentClassifier;
use pampax_retrieval::graph::{GraphExpandParams, GraphExpander, GraphExpansionResult};
use pampax_retrieval::hybrid::{HybridRetrieveOptions, HybridRetriever};
use pampax_retrieval::rerank::{RerankDocument, RerankOptions, Reranker};
use uuid::Uuid;

use crate::degrade::{thresholds_for_model, DegradeItem, DegradePolicyEngine};
use crate::stopping::{StoppingReasonEngine, StoppingThresholds};
use crate::tokenizer::TokenizerFactory;

/// Caller-facing knobs for one `assemble_with_explanation` call.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub budget: u32,
    pub model: String,
    pub repo: Option<String>,
    pub language: Option<String>,
    pub graph_enabled: bool,
    pub rerank_enabled: bool,
    pub cache_enabled: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            budget: 8000,
            model: "gpt-4".to_string(),
            repo: None,
            language: None,
            graph_enabled: true,
            rerank_enabled: true,
            cache_enabled: true,
        }
    }
}

/// Orchestrates every pipeline stage over one `StorageBackend`. Cheap to
/// clone — every field is itself `Arc`-backed or stateless.
#[derive(Clone)]
pub struct ContextAssembler {
    storage: Arc<dyn StorageBackend>,
    cache: NamespacedCache,
    intent_classifier: IntentClassifier,
    policy_gate: Arc<PolicyGate>,
    tokenizer_factory: TokenizerFactory,
    reranker: Arc<Reranker>,
}

impl ContextAssembler {
    pub fn new(storage: Arc<dyn StorageBackend>, cache: NamespacedCache, policy_overrides: HashMap<String, PolicyOverride>) -> Self {
        let reranker = Reranker::new(Some(cache.clone()));
        Self {
            storage,
            cache,
            intent_classifier: IntentClassifier::new(),
            policy_gate: Arc::new(PolicyGate::new(policy_overrides)),
            tokenizer_factory: TokenizerFactory::new(),
            reranker: Arc::new(reranker),
        }
    }

    /// Runs the full pipeline for `query` and returns the token-budgeted
    /// bundle. `total_tokens <= budget` always holds; `correlation_id` is
    /// shared by every stage's logs and metrics for the duration of the
    /// call.
    pub async fn assemble_with_explanation(&self, query: &str, options: &AssembleOptions) -> PampaxResult<Bundle> {
        let correlation_id = Uuid::now_v7().to_string();
        let assembler = self.clone();
        let query = query.to_string();
        let options = options.clone();
        pampax_telemetry::with_correlation(correlation_id.clone(), move || async move {
            assembler.run(&query, &options, correlation_id).await
        })
        .await
    }

    async fn run(&self, query: &str, options: &AssembleOptions, correlation_id: String) -> PampaxResult<Bundle> {
        let start = Instant::now();
        let mut stopping = StoppingReasonEngine::new(StoppingThresholds::default());
        let mut errors: Vec<String> = Vec::new();
        let mut retrievers_used: Vec<MatchSource> = Vec::new();

        let intent_result = self.intent_classifier.classify(query, None);
        let search_context = SearchContext {
            repo: options.repo.clone(),
            language: options.language.clone(),
            query_length: Some(query.chars().count()),
            budget: Some(options.budget),
        };
        let policy = self.policy_gate.decide(&intent_result, &search_context);
        for problem in pampax_policy::gate::validate(&policy) {
            errors.push(format!("policy validation: {problem}"));
        }

        let outcome = self.retrieve(query, options, &policy).await?;
        retrievers_used.extend(outcome.retrievers_used.iter().copied());
        for failure in &outcome.soft_failures {
            stopping.record_search_failure("hybrid_retriever", failure.clone());
        }
        if outcome.results.is_empty() && !outcome.soft_failures.is_empty() {
            errors.push("all retrieval sources failed".to_string());
        }

        let mut results = outcome.results;

        if options.graph_enabled {
            let seeds: Vec<SymbolId> = results
                .iter()
                .filter_map(|r| r.metadata.span_name.clone())
                .take(5)
                .collect();
            if !seeds.is_empty() {
                let expander = GraphExpander::new(self.storage.clone());
                let params = GraphExpandParams {
                    seeds,
                    max_depth: policy.max_depth as u32,
                    max_nodes: 50,
                    max_edges: 100,
                    token_budget: options.budget,
                    edge_type_filter: None,
                    timeout_ms: 2_000,
                    intent: Some(intent_result.intent),
                };
                match expander.expand(query, &params).await {
                    GraphExpansionResult::Expanded(expansion) => {
                        if expansion.truncated {
                            stopping.record_graph_traversal_limit(
                                "graph_expander",
                                format!("traversal degraded due to {:?}", expansion.degraded_due_to),
                            );
                        }
                        retrievers_used.push(MatchSource::Graph);
                    }
                    GraphExpansionResult::Failed { error } => {
                        errors.push(format!("graph expansion failed, degrading to retrieval-only: {error}"));
                    }
                }
            }
        }

        if options.rerank_enabled && !results.is_empty() {
            results = self.rerank(query, results, &mut stopping, &mut errors).await;
        }

        let tokenizer = self.tokenizer_factory.create(&options.model);
        let mut tokens: Vec<u32> = results.iter().map(|r| tokenizer.count_tokens(&r.content)).collect();
        let total_tokens: u32 = tokens.iter().sum();

        let (mut final_results, tokens_used, degraded) = if total_tokens > options.budget {
            stopping.record_degradation_triggered("degrade_engine", format!("{total_tokens} tokens exceeds budget {}", options.budget));
            let degrade_items: Vec<DegradeItem> = results
                .iter()
                .zip(tokens.iter())
                .map(|(r, t)| DegradeItem { id: r.id.to_string(), path: r.path.clone(), content: r.content.clone(), span_kind: r.span_kind, score: r.score, tokens: *t })
                .collect();
            let engine = DegradePolicyEngine::new(thresholds_for_model(&options.model));
            let degrade_result = engine.degrade(&degrade_items, options.budget);

            let kept: HashMap<String, String> = degrade_result.degraded.iter().map(|d| (d.id.clone(), d.content.clone())).collect();
            let kept_tokens: HashMap<String, u32> = degrade_result.degraded.iter().map(|d| (d.id.clone(), d.tokens)).collect();
            let mut rebuilt: Vec<SearchResult> = results
                .into_iter()
                .filter(|r| kept.contains_key(&r.id.to_string()))
                .map(|mut r| {
                    let key = r.id.to_string();
                    r.content = kept.get(&key).cloned().unwrap_or_default();
                    r
                })
                .collect();
            tokens = rebuilt.iter().map(|r| *kept_tokens.get(&r.id.to_string()).unwrap_or(&0)).collect();
            let used: u32 = tokens.iter().sum();

            // Emergency-level stubs can still overshoot a very small budget
            // when there are many items; drop from the tail until it fits.
            let mut used = used;
            while used > options.budget && !rebuilt.is_empty() {
                if let Some(last_tokens) = tokens.pop() {
                    used = used.saturating_sub(last_tokens);
                    rebuilt.pop();
                }
            }

            (rebuilt, used, true)
        } else {
            (results, total_tokens, false)
        };

        stopping.check_budget(tokens_used, options.budget, "context_assembler");
        stopping.check_result_limit(final_results.len() as u32, policy.early_stop_threshold as u32, "context_assembler");
        let cache_stats = self.cache.stats().await;
        if cache_stats.total_hits + cache_stats.total_misses > 0 {
            stopping.check_cache_hit_rate(cache_stats.global_hit_rate as f32, "namespaced_cache");
        }

        if final_results.len() > policy.early_stop_threshold as usize {
            final_results.truncate(policy.early_stop_threshold as usize);
        }

        let explanation = Explanation {
            policy: Some(policy),
            retrievers_used,
            stopping_conditions: stopping.conditions().to_vec(),
            errors,
        };

        Ok(Bundle {
            query: query.to_string(),
            results: final_results,
            explanation,
            tokens_used,
            budget: options.budget,
            correlation_id,
            truncated: degraded,
            performance_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn retrieve(&self, query: &str, options: &AssembleOptions, policy: &PolicyDecision) -> PampaxResult<pampax_retrieval::hybrid::HybridOutcome> {
        let hybrid = HybridRetriever::new(self.storage.clone());
        let hybrid_options = HybridRetrieveOptions {
            repository: options.repo.clone(),
            limit: Some(policy.early_stop_threshold as usize),
        };

        if !options.cache_enabled {
            let outcome = hybrid.retrieve(query, &hybrid_options).await?;
            if let Ok(key) = CacheKey::generate("search", &(query, &options.repo)) {
                let _ = self.cache.put("search", &key, &outcome, None).await;
            }
            return Ok(outcome);
        }

        let key = CacheKey::generate("search", &(query, &options.repo)).map_err(cache_key_error)?;
        let (cached, _from_cache) = self
            .cache
            .get_or_fetch("search", &key, || async { Ok(Some(hybrid.retrieve(query, &hybrid_options).await?)) })
            .await?;
        Ok(cached.unwrap_or_default())
    }

    /// Reranks `results`, never failing the pipeline: a reranker error (bad
    /// input) or a total provider failure (primary and fallback both down)
    /// both degrade to the pre-rerank order, recording a `QualityThreshold`
    /// stopping condition and an explanation error instead of aborting
    /// bundle assembly.
    async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        stopping: &mut StoppingReasonEngine,
        errors: &mut Vec<String>,
    ) -> Vec<SearchResult> {
        let documents: Vec<RerankDocument> = results
            .iter()
            .map(|r| RerankDocument { id: r.id.to_string(), text: Some(r.content.clone()), content: None, score: Some(r.score) })
            .collect();

        let outcome = match self.reranker.rerank(query, &documents, &RerankOptions::default()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                errors.push(format!("reranker call failed, keeping pre-rerank order: {err}"));
                stopping.record(StoppingCondition::new(
                    StoppingConditionType::QualityThreshold,
                    "reranker",
                    format!("reranker call failed: {err}"),
                ));
                return results;
            }
        };

        if !outcome.success {
            let reason = outcome.error.unwrap_or_else(|| "all rerank providers failed".to_string());
            errors.push(format!("reranker degraded to pre-rerank order: {reason}"));
            stopping.record(StoppingCondition::new(
                StoppingConditionType::QualityThreshold,
                "reranker",
                format!("all rerank providers failed, using pre-rerank order: {reason}"),
            ));
            return results;
        }

        let mut by_id: HashMap<String, SearchResult> = results.into_iter().map(|r| (r.id.to_string(), r)).collect();
        let mut reordered = Vec::with_capacity(outcome.results.len());
        for item in outcome.results {
            if let Some(mut result) = by_id.remove(&item.document_id) {
                result.relevance_score = Some(item.relevance_score);
                result.fused_score = item.fused_score;
                reordered.push(result);
            }
        }
        // Anything the reranker dropped (e.g. below top_k) is excluded from
        // the final bundle rather than silently re-appended out of order.
        reordered
    }
}

fn cache_key_error(err: serde_json::Error) -> pampax_core::error::PampaxError {
    pampax_core::error::PampaxError::Cache(pampax_core::error::CacheError::BackendFailure {
        scope: "search".to_string(),
        reason: format!("failed to build cache key: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pampax_cache::cache::NamespacedCache;
    use pampax_cache::storage::MockStorageBackend;
    use pampax_core::identity::ChunkId;
    use pampax_core::model::{SearchResultMetadata, SpanKind};
    use std::time::Duration;

    fn storage_with_results(count: usize) -> Arc<MockStorageBackend> {
        let storage = Arc::new(MockStorageBackend::new());
        let results: Vec<SearchResult> = (0..count)
            .map(|i| SearchResult {
                id: ChunkId::now_v7(),
                path: format!("src/file_{i}.rs"),
                content: format!("fn handler_{i}() {{\n    do_thing();\n}}\n").repeat(20),
                score: 1.0 - (i as f32 * 0.05),
                span_kind: SpanKind::Function,
                metadata: SearchResultMetadata { span_name: Some(format!("handler_{i}")), match_sources: vec![MatchSource::Bm25] },
                fused_score: None,
                relevance_score: None,
            })
            .collect();
        storage.seed_search_results(results);
        storage
    }

    fn assembler_for(storage: Arc<MockStorageBackend>) -> ContextAssembler {
        let cache = NamespacedCache::with_default_scopes(100, Duration::from_secs(60));
        ContextAssembler::new(storage, cache, HashMap::new())
    }

    #[tokio::test]
    async fn assembled_bundle_respects_budget() {
        let assembler = assembler_for(storage_with_results(10));
        let options = AssembleOptions { budget: 200, graph_enabled: false, rerank_enabled: false, cache_enabled: false, ..Default::default() };
        let bundle = assembler.assemble_with_explanation("find the handler function", &options).await.unwrap();
        assert!(bundle.within_budget(), "tokens_used {} budget {}", bundle.tokens_used, bundle.budget);
    }

    #[tokio::test]
    async fn bundle_carries_a_correlation_id_and_policy_explanation() {
        let assembler = assembler_for(storage_with_results(3));
        let options = AssembleOptions { graph_enabled: false, rerank_enabled: false, ..Default::default() };
        let bundle = assembler.assemble_with_explanation("config settings for the service", &options).await.unwrap();
        assert!(!bundle.correlation_id.is_empty());
        assert!(bundle.explanation.policy.is_some());
    }

    #[tokio::test]
    async fn generous_budget_leaves_results_unchanged() {
        let assembler = assembler_for(storage_with_results(2));
        let options = AssembleOptions { budget: 1_000_000, graph_enabled: false, rerank_enabled: false, ..Default::default() };
        let bundle = assembler.assemble_with_explanation("lookup", &options).await.unwrap();
        assert!(!bundle.truncated);
        assert_eq!(bundle.results.len(), 2);
    }

    #[tokio::test]
    async fn cache_enabled_populates_the_search_scope() {
        let storage = storage_with_results(1);
        let assembler = assembler_for(storage);
        let options = AssembleOptions { graph_enabled: false, rerank_enabled: false, cache_enabled: true, ..Default::default() };
        assembler.assemble_with_explanation("handler lookup", &options).await.unwrap();
        let stats = assembler.cache.stats().await;
        assert!(stats.namespaces.contains_key("search"));
    }

    #[tokio::test]
    async fn disabled_graph_and_rerank_still_uses_raw_retrieval_order() {
        let assembler = assembler_for(storage_with_results(4));
        let options = AssembleOptions { graph_enabled: false, rerank_enabled: false, ..Default::default() };
        let bundle = assembler.assemble_with_explanation("lookup", &options).await.unwrap();
        assert_eq!(bundle.results.len(), 4);
    }

    #[test]
    fn cache_key_error_wraps_serde_failure_as_cache_backend_failure() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let wrapped = cache_key_error(err);
        assert!(matches!(
            wrapped,
            pampax_core::error::PampaxError::Cache(pampax_core::error::CacheError::BackendFailure { .. })
        ));
    }
}
