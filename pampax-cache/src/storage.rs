//! The storage contract the core requires of the indexer/DB: lexical,
//! vector, and memory search; edge lookups for graph expansion; chunk
//! fetch by id. The core treats every method as read-only except the
//! memory store, which callers may also write to.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use pampax_core::error::{GraphError, PampaxError, PampaxResult, RetrievalError};
use pampax_core::identity::{ChunkId, SymbolId};
use pampax_core::model::{Chunk, Edge, EdgeType, MatchSource, SearchResult};

/// Options accepted by `StorageBackend::search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub repository: Option<String>,
    /// Which engine to query. `None` lets the backend pick (e.g. a combined
    /// lexical+vector query); the hybrid retriever sets this explicitly so
    /// each sub-retriever can fail independently of the others.
    pub source: Option<MatchSource>,
}

/// A single fact in the repo-scoped memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFact {
    pub scope: String,
    pub kind: String,
    pub key: String,
    pub value: serde_json::Value,
    pub weight: f32,
}

/// What the core requires of the indexer/DB layer. Implementations back
/// the hybrid retriever's four sub-retrievers and the graph BFS expander's
/// edge lookups.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> PampaxResult<Vec<SearchResult>>;

    async fn get_outgoing_edges(&self, node_id: &SymbolId, types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>>;

    async fn get_incoming_edges(&self, node_id: &SymbolId, types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>>;

    async fn get_chunk(&self, id: ChunkId) -> PampaxResult<Chunk>;

    async fn memory_insert(&self, fact: MemoryFact) -> PampaxResult<()>;

    async fn memory_query(&self, scope: &str, kind: Option<&str>) -> PampaxResult<Vec<MemoryFact>>;

    /// The chunk backing a graph node, if the indexer recorded one. Used by
    /// the graph expander to charge traversal against the token budget.
    /// Defaults to `None` so backends with no symbol-to-chunk mapping don't
    /// need to implement it.
    async fn get_chunk_for_symbol(&self, _symbol: &SymbolId) -> PampaxResult<Option<Chunk>> {
        Ok(None)
    }
}

/// In-memory `StorageBackend` for tests and for exercising the pipeline
/// without a real indexer.
#[derive(Default)]
pub struct MockStorageBackend {
    chunks: RwLock<HashMap<ChunkId, Chunk>>,
    search_results: RwLock<Vec<SearchResult>>,
    outgoing: RwLock<HashMap<SymbolId, Vec<Edge>>>,
    incoming: RwLock<HashMap<SymbolId, Vec<Edge>>>,
    memory: RwLock<Vec<MemoryFact>>,
}

impl MockStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_chunk(&self, chunk: Chunk) {
        self.chunks.write().unwrap().insert(chunk.id, chunk);
    }

    pub fn seed_search_results(&self, results: Vec<SearchResult>) {
        *self.search_results.write().unwrap() = results;
    }

    pub fn seed_edge(&self, edge: Edge) {
        self.outgoing
            .write()
            .unwrap()
            .entry(edge.from_symbol.clone())
            .or_default()
            .push(edge.clone());
        self.incoming
            .write()
            .unwrap()
            .entry(edge.to_symbol.clone())
            .or_default()
            .push(edge);
    }
}

#[async_trait]
impl StorageBackend for MockStorageBackend {
    async fn search(&self, _query: &str, options: &SearchOptions) -> PampaxResult<Vec<SearchResult>> {
        let results = self.search_results.read().unwrap().clone();
        Ok(match options.limit {
            Some(limit) => results.into_iter().take(limit).collect(),
            None => results,
        })
    }

    async fn get_outgoing_edges(&self, node_id: &SymbolId, types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>> {
        let edges = self.outgoing.read().unwrap();
        Ok(filter_edges(edges.get(node_id), types))
    }

    async fn get_incoming_edges(&self, node_id: &SymbolId, types: Option<&[EdgeType]>) -> PampaxResult<Vec<Edge>> {
        let edges = self.incoming.read().unwrap();
        Ok(filter_edges(edges.get(node_id), types))
    }

    async fn get_chunk(&self, id: ChunkId) -> PampaxResult<Chunk> {
        self.chunks
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| PampaxError::Graph(GraphError::StorageFailure {
                reason: format!("chunk {id} not found"),
            }))
    }

    async fn memory_insert(&self, fact: MemoryFact) -> PampaxResult<()> {
        self.memory.write().unwrap().push(fact);
        Ok(())
    }

    async fn memory_query(&self, scope: &str, kind: Option<&str>) -> PampaxResult<Vec<MemoryFact>> {
        let facts = self.memory.read().unwrap();
        Ok(facts
            .iter()
            .filter(|f| f.scope == scope && kind.map_or(true, |k| f.kind == k))
            .cloned()
            .collect())
    }
}

fn filter_edges(edges: Option<&Vec<Edge>>, types: Option<&[EdgeType]>) -> Vec<Edge> {
    let Some(edges) = edges else { return Vec::new() };
    match types {
        Some(types) => edges.iter().filter(|e| types.contains(&e.edge_type)).cloned().collect(),
        None => edges.clone(),
    }
}

/// Soft-failure wrapper for a sub-retriever: unavailability of any one
/// source is logged but non-fatal, per the hybrid retriever's contract.
pub async fn search_soft_fail(
    backend: &dyn StorageBackend,
    query: &str,
    options: &SearchOptions,
    source: &str,
) -> Option<Vec<SearchResult>> {
    match backend.search(query, options).await {
        Ok(results) => Some(results),
        Err(err) => {
            tracing::warn!(source, error = %err, "retrieval source failed, continuing without it");
            None
        }
    }
}

/// Returns the `RetrievalError::AllSourcesFailed` error for callers that
/// collected zero results across every sub-retriever.
pub fn all_sources_failed() -> PampaxError {
    PampaxError::Retrieval(RetrievalError::AllSourcesFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pampax_core::identity::compute_content_hash;
    use pampax_core::model::SpanKind;

    fn make_chunk(id: ChunkId) -> Chunk {
        Chunk {
            id,
            repository_id: pampax_core::identity::RepositoryId::now_v7(),
            file_path: "src/lib.rs".into(),
            start_byte: 0,
            end_byte: 10,
            start_line: 1,
            end_line: 2,
            language: "rust".into(),
            content: "fn x() {}".into(),
            content_hash: compute_content_hash(b"fn x() {}"),
            span_kind: SpanKind::Function,
            token_count: 4,
        }
    }

    #[tokio::test]
    async fn get_chunk_returns_seeded_value() {
        let storage = MockStorageBackend::new();
        let id = ChunkId::now_v7();
        storage.seed_chunk(make_chunk(id));

        let chunk = storage.get_chunk(id).await.unwrap();
        assert_eq!(chunk.id, id);
    }

    #[tokio::test]
    async fn get_chunk_missing_returns_graph_error() {
        let storage = MockStorageBackend::new();
        let result = storage.get_chunk(ChunkId::now_v7()).await;
        assert!(matches!(result, Err(PampaxError::Graph(GraphError::StorageFailure { .. }))));
    }

    #[tokio::test]
    async fn edges_filtered_by_type() {
        let storage = MockStorageBackend::new();
        storage.seed_edge(Edge {
            from_symbol: "UserService".into(),
            to_symbol: "DatabaseService".into(),
            edge_type: EdgeType::Calls,
            confidence: 0.9,
        });
        storage.seed_edge(Edge {
            from_symbol: "UserService".into(),
            to_symbol: "AuthService".into(),
            edge_type: EdgeType::Uses,
            confidence: 0.5,
        });

        let calls_only = storage
            .get_outgoing_edges(&"UserService".to_string(), Some(&[EdgeType::Calls]))
            .await
            .unwrap();
        assert_eq!(calls_only.len(), 1);
        assert_eq!(calls_only[0].to_symbol, "DatabaseService");
    }

    #[tokio::test]
    async fn memory_insert_then_query_by_scope_and_kind() {
        let storage = MockStorageBackend::new();
        storage
            .memory_insert(MemoryFact {
                scope: "repo-a".into(),
                kind: "incident".into(),
                key: "last-outage".into(),
                value: serde_json::json!("db timeout"),
                weight: 1.0,
            })
            .await
            .unwrap();

        let results = storage.memory_query("repo-a", Some("incident")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "last-outage");

        let empty = storage.memory_query("repo-a", Some("other")).await.unwrap();
        assert!(empty.is_empty());
    }
}
