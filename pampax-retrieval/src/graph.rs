//! Bounded breadth-first traversal over the edge table, seeded from a set
//! of symbol ids. Never fatal: a storage exception degrades the pipeline to
//! "retrieval-only" rather than propagating an error.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use pampax_cache::storage::StorageBackend;
use pampax_core::identity::SymbolId;
use pampax_core::model::{Edge, EdgeType, Intent};
use serde::{Deserialize, Serialize};

/// Bounds and filters for one `expand` call.
#[derive(Debug, Clone)]
pub struct GraphExpandParams {
    pub seeds: Vec<SymbolId>,
    pub max_depth: u32,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub token_budget: u32,
    pub edge_type_filter: Option<Vec<EdgeType>>,
    pub timeout_ms: u64,
    /// Drives the intent-aware neighbor-scoring weights; `None` uses a flat
    /// weight for every edge type.
    pub intent: Option<Intent>,
}

/// A single recorded traversal edge, carrying both its raw confidence and
/// the intent-aware score derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalEdge {
    pub from: SymbolId,
    pub to: SymbolId,
    pub edge_type: EdgeType,
    pub confidence: f32,
    pub score: f32,
}

/// Which limit caused the traversal to stop before the frontier emptied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradeReason {
    Depth,
    Nodes,
    Edges,
    Budget,
    Timeout,
}

/// The result of a bounded BFS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExpansion {
    pub query: String,
    pub start_symbols: Vec<SymbolId>,
    pub visited_nodes: Vec<SymbolId>,
    pub edges: Vec<TraversalEdge>,
    pub tokens_used: u32,
    pub truncated: bool,
    pub performance_ms: u64,
    pub degraded_due_to: Option<DegradeReason>,
}

/// `expand` never returns an error type: a storage exception is represented
/// as `Failed`, so the context assembler can degrade to retrieval-only
/// without a `?`-propagated failure reaching the caller.
#[derive(Debug, Clone)]
pub enum GraphExpansionResult {
    Expanded(GraphExpansion),
    Failed { error: String },
}

fn w_intent(edge_type: EdgeType, intent: Option<Intent>) -> f32 {
    use EdgeType::*;
    match intent {
        Some(Intent::Symbol) => match edge_type {
            Uses | Calls => 1.0,
            _ => 0.5,
        },
        Some(Intent::Api) => match edge_type {
            Implements | References => 1.0,
            _ => 0.5,
        },
        Some(Intent::Incident) => match edge_type {
            Calls | Configures => 1.0,
            _ => 0.5,
        },
        Some(Intent::Config) => match edge_type {
            Configures | Manages => 1.0,
            _ => 0.5,
        },
        Some(Intent::Search) | None => 0.7,
    }
}

/// Bounded BFS over one `StorageBackend`'s edge table and chunk lookup.
pub struct GraphExpander {
    storage: Arc<dyn StorageBackend>,
}

impl GraphExpander {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn expand(&self, query: &str, params: &GraphExpandParams) -> GraphExpansionResult {
        let start_time = Instant::now();
        let mut visited: HashSet<SymbolId> = params.seeds.iter().cloned().collect();
        let mut visited_order: Vec<SymbolId> = params.seeds.clone();
        let mut queue: VecDeque<(SymbolId, u32)> = params.seeds.iter().cloned().map(|s| (s, 0)).collect();
        let mut edges: Vec<TraversalEdge> = Vec::new();
        let mut tokens_used: u32 = 0;
        let mut stop_reason: Option<DegradeReason> = None;

        for seed in &params.seeds {
            match self.storage.get_chunk_for_symbol(seed).await {
                Ok(Some(chunk)) => tokens_used += chunk.token_count,
                Ok(None) => {}
                Err(err) => return GraphExpansionResult::Failed { error: err.to_string() },
            }
        }

        'bfs: while let Some((node, depth)) = queue.pop_front() {
            if start_time.elapsed().as_millis() as u64 >= params.timeout_ms {
                stop_reason = Some(DegradeReason::Timeout);
                break 'bfs;
            }
            if tokens_used >= params.token_budget {
                stop_reason = Some(DegradeReason::Budget);
                break 'bfs;
            }
            if visited_order.len() >= params.max_nodes {
                stop_reason = Some(DegradeReason::Nodes);
                break 'bfs;
            }
            if edges.len() >= params.max_edges {
                stop_reason = Some(DegradeReason::Edges);
                break 'bfs;
            }
            if depth == params.max_depth {
                continue;
            }

            let filter = params.edge_type_filter.as_deref();
            let (outgoing, incoming) = match tokio::try_join!(
                self.storage.get_outgoing_edges(&node, filter),
                self.storage.get_incoming_edges(&node, filter),
            ) {
                Ok(pair) => pair,
                Err(err) => return GraphExpansionResult::Failed { error: err.to_string() },
            };

            let mut candidates: Vec<(SymbolId, Edge)> = Vec::with_capacity(outgoing.len() + incoming.len());
            candidates.extend(outgoing.into_iter().map(|edge| (edge.to_symbol.clone(), edge)));
            candidates.extend(incoming.into_iter().map(|edge| (edge.from_symbol.clone(), edge)));

            candidates.sort_by(|a, b| {
                b.1.confidence
                    .partial_cmp(&a.1.confidence)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });

            for (neighbor, edge) in candidates {
                if visited.contains(&neighbor) {
                    continue;
                }
                if visited_order.len() >= params.max_nodes {
                    stop_reason = Some(DegradeReason::Nodes);
                    break 'bfs;
                }
                if edges.len() >= params.max_edges {
                    stop_reason = Some(DegradeReason::Edges);
                    break 'bfs;
                }

                let score = (edge.confidence * w_intent(edge.edge_type, params.intent)).clamp(0.0, 1.0);
                edges.push(TraversalEdge {
                    from: edge.from_symbol.clone(),
                    to: edge.to_symbol.clone(),
                    edge_type: edge.edge_type,
                    confidence: edge.confidence,
                    score,
                });
                visited.insert(neighbor.clone());
                visited_order.push(neighbor.clone());

                match self.storage.get_chunk_for_symbol(&neighbor).await {
                    Ok(Some(chunk)) => tokens_used += chunk.token_count,
                    Ok(None) => {}
                    Err(err) => return GraphExpansionResult::Failed { error: err.to_string() },
                }

                queue.push_back((neighbor, depth + 1));

                if tokens_used >= params.token_budget {
                    stop_reason = Some(DegradeReason::Budget);
                    break 'bfs;
                }
            }
        }

        GraphExpansionResult::Expanded(GraphExpansion {
            query: query.to_string(),
            start_symbols: params.seeds.clone(),
            visited_nodes: visited_order,
            edges,
            tokens_used,
            truncated: stop_reason.is_some(),
            performance_ms: start_time.elapsed().as_millis() as u64,
            degraded_due_to: stop_reason,
        })
    }
}
