//! Hybrid retrieval, cross-provider reranking, and bounded graph expansion.
//! Every stage here tolerates partial failure: a sub-retriever or the graph
//! expander degrades gracefully rather than aborting the pipeline.

pub mod graph;
pub mod hybrid;
pub mod rerank;

pub use graph::{DegradeReason, GraphExpandParams, GraphExpander, GraphExpansion, GraphExpansionResult, TraversalEdge};
pub use hybrid::{HybridOutcome, HybridRetrieveOptions, HybridRetriever};
pub use rerank::{rrf_fuse, RerankDocument, RerankOptions, RerankOutcome, Reranker, RerankedItem, RRF_K};
