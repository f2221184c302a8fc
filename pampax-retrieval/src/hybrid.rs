//! Hybrid retriever: fans out to BM25, vector, symbol and memory
//! sub-retrievers, tolerates any one of them failing, and deduplicates
//! the union by `(path, id-or-content-hash)`.

use std::collections::HashMap;
use std::sync::Arc;

use pampax_cache::storage::{all_sources_failed, search_soft_fail, MemoryFact, SearchOptions, StorageBackend};
use pampax_core::error::PampaxResult;
use pampax_core::identity::{compute_content_hash, ChunkId, EntityIdType};
use pampax_core::model::{MatchSource, SearchResult, SearchResultMetadata, SpanKind};
use uuid::Uuid;

/// Caller-facing knobs for a single `retrieve` call.
#[derive(Debug, Clone, Default)]
pub struct HybridRetrieveOptions {
    pub repository: Option<String>,
    pub limit: Option<usize>,
}

/// The union of everything the four sub-retrievers found, plus bookkeeping
/// about which of them actually ran.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HybridOutcome {
    pub results: Vec<SearchResult>,
    pub retrievers_used: Vec<MatchSource>,
    /// Human-readable names of sub-retrievers that soft-failed this call.
    pub soft_failures: Vec<String>,
}

/// Composes the four sub-retrievers over one `StorageBackend`.
pub struct HybridRetriever {
    storage: Arc<dyn StorageBackend>,
}

impl HybridRetriever {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn retrieve(&self, query: &str, options: &HybridRetrieveOptions) -> PampaxResult<HybridOutcome> {
        let search_opts = |source: MatchSource| SearchOptions {
            limit: options.limit,
            repository: options.repository.clone(),
            source: Some(source),
        };
        let memory_scope = options.repository.clone().unwrap_or_else(|| "default".to_string());

        let (bm25, vector, symbol, memory) = tokio::join!(
            search_soft_fail(self.storage.as_ref(), query, &search_opts(MatchSource::Bm25), "bm25"),
            search_soft_fail(self.storage.as_ref(), query, &search_opts(MatchSource::Vector), "vector"),
            search_soft_fail(self.storage.as_ref(), query, &search_opts(MatchSource::Symbol), "symbol"),
            memory_soft_fail(self.storage.as_ref(), &memory_scope),
        );

        let mut retrievers_used = Vec::new();
        let mut soft_failures = Vec::new();
        let mut merged: HashMap<(String, String), SearchResult> = HashMap::new();

        for (label, source, hits) in [
            ("bm25", MatchSource::Bm25, bm25),
            ("vector", MatchSource::Vector, vector),
            ("symbol", MatchSource::Symbol, symbol),
        ] {
            match hits {
                Some(results) => {
                    retrievers_used.push(source);
                    merge_with_dedup(&mut merged, results, source);
                }
                None => soft_failures.push(label.to_string()),
            }
        }

        match memory {
            Some(facts) => {
                retrievers_used.push(MatchSource::Memory);
                let results = facts.into_iter().map(memory_fact_to_result).collect();
                merge_with_dedup(&mut merged, results, MatchSource::Memory);
            }
            None => soft_failures.push("memory".to_string()),
        }

        if retrievers_used.is_empty() {
            return Err(all_sources_failed());
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            results.truncate(limit);
        }

        Ok(HybridOutcome { results, retrievers_used, soft_failures })
    }
}

async fn memory_soft_fail(storage: &dyn StorageBackend, scope: &str) -> Option<Vec<MemoryFact>> {
    match storage.memory_query(scope, None).await {
        Ok(facts) => Some(facts),
        Err(err) => {
            tracing::warn!(source = "memory", error = %err, "retrieval source failed, continuing without it");
            None
        }
    }
}

fn memory_fact_to_result(fact: MemoryFact) -> SearchResult {
    let path = format!("memory://{}/{}/{}", fact.scope, fact.kind, fact.key);
    SearchResult {
        id: memory_fact_id(&fact),
        path,
        content: serde_json::to_string(&fact.value).unwrap_or_default(),
        score: fact.weight.clamp(0.0, 1.0),
        span_kind: SpanKind::Other,
        metadata: SearchResultMetadata { span_name: Some(fact.key.clone()), match_sources: vec![MatchSource::Memory] },
        fused_score: None,
        relevance_score: None,
    }
}

/// Memory facts have no natural chunk id, so derive one deterministically
/// from identity (scope, kind, key) — same inputs always yield the same id,
/// which is what dedup-by-id needs.
fn memory_fact_id(fact: &MemoryFact) -> ChunkId {
    let hash = compute_content_hash(format!("{}:{}:{}", fact.scope, fact.kind, fact.key).as_bytes());
    let bytes = hex::decode(&hash[..32]).unwrap_or_else(|_| vec![0u8; 16]);
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes[..16]);
    ChunkId::new(Uuid::from_bytes(raw))
}

fn merge_with_dedup(acc: &mut HashMap<(String, String), SearchResult>, results: Vec<SearchResult>, source: MatchSource) {
    for mut result in results {
        if result.metadata.match_sources.is_empty() {
            result.metadata.match_sources = vec![source];
        }
        let key = result.dedup_key();
        acc.entry(key)
            .and_modify(|existing| {
                if result.score > existing.score {
                    existing.score = result.score;
                }
                for tagged in &result.metadata.match_sources {
                    if !existing.metadata.match_sources.contains(tagged) {
                        existing.metadata.match_sources.push(*tagged);
                    }
                }
                if existing.metadata.span_name.is_none() {
                    existing.metadata.span_name = result.metadata.span_name.clone();
                }
            })
            .or_insert(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pampax_core::error::{PampaxError, RetrievalError};
    use pampax_core::identity::{ChunkId as CoreChunkId, SymbolId};
    use pampax_core::model::{Chunk, Edge, EdgeType};
    use std::sync::Mutex;

    /// Test-only backend whose `search` fails for configured sources so the
    /// soft-failure path can be exercised deterministically.
    struct FlakyBackend {
        results: Mutex<HashMap<MatchSource, Vec<SearchResult>>>,
        memory: Mutex<Vec<MemoryFact>>,
        fail_sources: Vec<MatchSource>,
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn search(&self, _query: &str, options: &SearchOptions) -> PampaxResult<Vec<SearchResult>> {
            let source = options.source.expect("test always sets a source");
            if self.fail_sources.contains(&source) {
                return Err(PampaxError::Retrieval(RetrievalError::SourceFailed {
                    source: format!("{source:?}"),
                    reason: "simulated outage".to_string(),
                }));
            }
            Ok(self.results.lock().unwrap().get(&source).cloned().unwrap_or_default())
        }

        async fn get_outgoing_edges(&self, _node_id: &SymbolId, _types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>> {
            Ok(Vec::new())
        }

        async fn get_incoming_edges(&self, _node_id: &SymbolId, _types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>> {
            Ok(Vec::new())
        }

        async fn get_chunk(&self, _id: CoreChunkId) -> PampaxResult<Chunk> {
            unimplemented!("not exercised by hybrid retriever tests")
        }

        async fn memory_insert(&self, fact: MemoryFact) -> PampaxResult<()> {
            self.memory.lock().unwrap().push(fact);
            Ok(())
        }

        async fn memory_query(&self, _scope: &str, _kind: Option<&str>) -> PampaxResult<Vec<MemoryFact>> {
            Ok(self.memory.lock().unwrap().clone())
        }
    }

    fn hit(id: ChunkId, path: &str, score: f32) -> SearchResult {
        SearchResult {
            id,
            path: path.to_string(),
            content: "fn x() {}".to_string(),
            score,
            span_kind: SpanKind::Function,
            metadata: SearchResultMetadata::default(),
            fused_score: None,
            relevance_score: None,
        }
    }

    #[tokio::test]
    async fn merges_and_dedups_across_sources() {
        let shared_id = ChunkId::now_v7();
        let mut results = HashMap::new();
        results.insert(MatchSource::Bm25, vec![hit(shared_id, "src/lib.rs", 0.4)]);
        results.insert(MatchSource::Vector, vec![hit(shared_id, "src/lib.rs", 0.9)]);
        results.insert(MatchSource::Symbol, vec![hit(ChunkId::now_v7(), "src/other.rs", 0.2)]);

        let backend = Arc::new(FlakyBackend { results: Mutex::new(results), memory: Mutex::new(Vec::new()), fail_sources: Vec::new() });
        let retriever = HybridRetriever::new(backend);
        let outcome = retriever.retrieve("query", &HybridRetrieveOptions::default()).await.unwrap();

        assert!(outcome.soft_failures.is_empty());
        let merged = outcome.results.iter().find(|r| r.id == shared_id).unwrap();
        assert_eq!(merged.score, 0.9);
        assert!(merged.metadata.match_sources.contains(&MatchSource::Bm25));
        assert!(merged.metadata.match_sources.contains(&MatchSource::Vector));
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn one_failed_source_is_soft_and_non_fatal() {
        let mut results = HashMap::new();
        results.insert(MatchSource::Bm25, vec![hit(ChunkId::now_v7(), "src/lib.rs", 0.5)]);

        let backend = Arc::new(FlakyBackend {
            results: Mutex::new(results),
            memory: Mutex::new(Vec::new()),
            fail_sources: vec![MatchSource::Vector],
        });
        let retriever = HybridRetriever::new(backend);
        let outcome = retriever.retrieve("query", &HybridRetrieveOptions::default()).await.unwrap();

        assert!(outcome.soft_failures.contains(&"vector".to_string()));
        assert!(!outcome.results.is_empty());
    }

    #[tokio::test]
    async fn all_sources_failing_is_an_error() {
        let backend = Arc::new(FlakyBackend {
            results: Mutex::new(HashMap::new()),
            memory: Mutex::new(Vec::new()),
            fail_sources: vec![MatchSource::Bm25, MatchSource::Vector, MatchSource::Symbol],
        });
        let retriever = HybridRetriever::new(backend);
        let result = retriever.retrieve("query", &HybridRetrieveOptions::default()).await;
        assert!(matches!(result, Err(PampaxError::Retrieval(RetrievalError::AllSourcesFailed))));
    }

    #[tokio::test]
    async fn memory_facts_become_search_results_with_stable_ids() {
        let backend = Arc::new(FlakyBackend {
            results: Mutex::new(HashMap::new()),
            memory: Mutex::new(vec![MemoryFact {
                scope: "repo-a".to_string(),
                kind: "incident".to_string(),
                key: "last-outage".to_string(),
                value: serde_json::json!("db timeout"),
                weight: 0.7,
            }]),
            fail_sources: vec![MatchSource::Bm25, MatchSource::Vector, MatchSource::Symbol],
        });
        let retriever = HybridRetriever::new(backend);
        let outcome = retriever.retrieve("query", &HybridRetrieveOptions::default()).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].score, 0.7);

        let again = memory_fact_id(&MemoryFact {
            scope: "repo-a".to_string(),
            kind: "incident".to_string(),
            key: "last-outage".to_string(),
            value: serde_json::json!("ignored"),
            weight: 0.0,
        });
        assert_eq!(outcome.results[0].id, again);
    }

    #[tokio::test]
    async fn limit_truncates_after_merge() {
        let mut results = HashMap::new();
        results.insert(
            MatchSource::Bm25,
            vec![hit(ChunkId::now_v7(), "a.rs", 0.9), hit(ChunkId::now_v7(), "b.rs", 0.8), hit(ChunkId::now_v7(), "c.rs", 0.7)],
        );
        let backend = Arc::new(FlakyBackend {
            results: Mutex::new(results),
            memory: Mutex::new(Vec::new()),
            fail_sources: vec![MatchSource::Vector, MatchSource::Symbol],
        });
        let retriever = HybridRetriever::new(backend);
        let options = HybridRetrieveOptions { repository: None, limit: Some(2) };
        let outcome = retriever.retrieve("query", &options).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].score, 0.9);
    }
}
