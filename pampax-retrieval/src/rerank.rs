//! Reranker service: local/api/rrf providers behind one contract, with a
//! fallback chain, a read-through cache, and the RRF fusion primitive used
//! both by the `rrf` provider and by callers fusing multiple ranked lists.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use pampax_cache::NamespacedCache;
use pampax_core::error::{PampaxError, PampaxResult, RerankError};
use pampax_core::model::CacheKey;
use serde::{Deserialize, Serialize};

/// RRF's constant; see `rrf_fuse`.
pub const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RerankerProvider {
    Local,
    Api,
    Rrf,
}

impl RerankerProvider {
    fn canonical_name(self) -> &'static str {
        match self {
            RerankerProvider::Local => "local",
            RerankerProvider::Api => "api",
            RerankerProvider::Rrf => "rrf",
        }
    }
}

/// Normalizes provider aliases: `transformers` -> `local`,
/// `cohere|voyage|jina` -> `api`.
fn normalize_provider_alias(name: &str) -> Option<RerankerProvider> {
    match name.to_lowercase().as_str() {
        "local" | "transformers" => Some(RerankerProvider::Local),
        "api" | "cohere" | "voyage" | "jina" => Some(RerankerProvider::Api),
        "rrf" => Some(RerankerProvider::Rrf),
        _ => None,
    }
}

/// A document to be reranked. `text` wins over `content` when both are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankDocument {
    pub id: String,
    pub text: Option<String>,
    pub content: Option<String>,
    /// Raw upstream score (e.g. from hybrid fusion), used by the `rrf`
    /// provider's tie-break and carried through as each result's `score`.
    pub score: Option<f32>,
}

impl RerankDocument {
    fn effective_text(&self) -> Option<&str> {
        self.text.as_deref().or(self.content.as_deref())
    }
}

/// Caller-facing options for one `rerank` call.
#[derive(Debug, Clone)]
pub struct RerankOptions {
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub model: Option<String>,
    pub top_k: Option<usize>,
    pub max_tokens: Option<usize>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            provider: "rrf".to_string(),
            fallback_provider: None,
            model: None,
            top_k: None,
            max_tokens: None,
            api_url: None,
            api_key: None,
        }
    }
}

/// One reranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedItem {
    pub index: usize,
    pub document_id: String,
    pub relevance_score: f32,
    pub score: f32,
    pub fused_score: Option<f32>,
}

/// The reranker's output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankOutcome {
    pub success: bool,
    pub provider: String,
    pub query: String,
    pub results: Vec<RerankedItem>,
    pub total_processed: usize,
    pub cached: bool,
    pub model: Option<String>,
    /// Set when `success` is false: the reason both the primary and
    /// fallback provider failed. `results` still carries the documents in
    /// their pre-rerank order in that case, never an empty list.
    pub error: Option<String>,
}

/// Reciprocal rank fusion: `score(d) = Σ_i 1 / (k + rank_i(d))`, `rank`
/// 1-based, documents absent from a list contributing nothing. Returns
/// `(id, fused_score, max_raw_score)` sorted by fused score descending,
/// ties broken by max raw score, then by first-seen (stable) input order.
pub fn rrf_fuse(ranked_lists: &[Vec<(String, f32)>], k: f32) -> Vec<(String, f32, f32)> {
    let mut fused: HashMap<String, f32> = HashMap::new();
    let mut max_raw: HashMap<String, f32> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for list in ranked_lists {
        for (position, (id, raw_score)) in list.iter().enumerate() {
            let rank = (position + 1) as f32;
            *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank);
            let best = max_raw.entry(id.clone()).or_insert(*raw_score);
            if *raw_score > *best {
                *best = *raw_score;
            }
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
    }

    let mut out: Vec<(String, f32, f32)> =
        order.into_iter().map(|id| (id.clone(), fused[&id], max_raw[&id])).collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
    });
    out
}

#[derive(Serialize)]
struct ApiRerankDocument<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ApiRerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<ApiRerankDocument<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Deserialize)]
struct ApiRerankResultEntry {
    index: usize,
    relevance_score: f32,
}

#[derive(Deserialize)]
struct ApiRerankResponse {
    results: Vec<ApiRerankResultEntry>,
}

/// Runs the configured provider with a fallback chain, caching the result.
pub struct Reranker {
    cache: Option<NamespacedCache>,
    http: reqwest::Client,
}

impl Reranker {
    pub fn new(cache: Option<NamespacedCache>) -> Self {
        Self { cache, http: reqwest::Client::new() }
    }

    pub async fn rerank(&self, query: &str, documents: &[RerankDocument], options: &RerankOptions) -> PampaxResult<RerankOutcome> {
        if documents.is_empty() {
            return Err(PampaxError::InvalidData("rerank requires at least one document".to_string()));
        }
        for doc in documents {
            if doc.effective_text().is_none() {
                return Err(PampaxError::InvalidData(format!("document '{}' has neither text nor content", doc.id)));
            }
        }

        let normalized_query = query.trim().to_lowercase();
        let doc_ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let cache_key = CacheKey::generate(
            "rerank",
            &(options.provider.clone(), options.model.clone(), normalized_query, doc_ids),
        )
        .map_err(|e| PampaxError::InvalidData(e.to_string()))?;

        match &self.cache {
            Some(cache) => {
                let (value, hit) = cache
                    .get_or_fetch("rerank", &cache_key, || async { self.execute(query, documents, options).await.map(Some) })
                    .await?;
                let mut outcome = value.ok_or_else(|| PampaxError::InvalidData("rerank produced no result".to_string()))?;
                outcome.cached = hit;
                Ok(outcome)
            }
            None => self.execute(query, documents, options).await,
        }
    }

    async fn execute(&self, query: &str, documents: &[RerankDocument], options: &RerankOptions) -> PampaxResult<RerankOutcome> {
        let primary = normalize_provider_alias(&options.provider)
            .ok_or_else(|| PampaxError::Rerank(RerankError::UnknownProvider { alias: options.provider.clone() }))?;

        match self.run_provider(primary, query, documents, options).await {
            Ok(outcome) => Ok(outcome),
            Err(primary_err) => {
                tracing::warn!(provider = primary.canonical_name(), error = %primary_err, "reranker provider failed, falling back");
                let fallback_alias = options.fallback_provider.clone().unwrap_or_else(|| "rrf".to_string());
                let fallback = normalize_provider_alias(&fallback_alias).unwrap_or(RerankerProvider::Rrf);
                match self.run_provider(fallback, query, documents, options).await {
                    Ok(outcome) => Ok(outcome),
                    Err(fallback_err) => {
                        tracing::warn!(
                            provider = fallback.canonical_name(),
                            error = %fallback_err,
                            "fallback reranker provider also failed, returning pre-rerank order"
                        );
                        Ok(Self::pre_rerank_outcome(
                            query,
                            documents,
                            format!("{} then {} failed: {fallback_err}", primary.canonical_name(), fallback.canonical_name()),
                        ))
                    }
                }
            }
        }
    }

    async fn run_provider(
        &self,
        provider: RerankerProvider,
        query: &str,
        documents: &[RerankDocument],
        options: &RerankOptions,
    ) -> PampaxResult<RerankOutcome> {
        let mut outcome = match provider {
            RerankerProvider::Rrf => self.rerank_rrf(query, documents, options),
            RerankerProvider::Local => self.rerank_local(query, documents, options),
            RerankerProvider::Api => self.rerank_api(query, documents, options).await?,
        };
        outcome.provider = provider.canonical_name().to_string();
        Ok(outcome)
    }

    fn rerank_rrf(&self, query: &str, documents: &[RerankDocument], options: &RerankOptions) -> RerankOutcome {
        let ranked: Vec<(String, f32)> = documents.iter().map(|d| (d.id.clone(), d.score.unwrap_or(0.0))).collect();
        let fused = rrf_fuse(&[ranked], RRF_K);

        let mut results: Vec<RerankedItem> = fused
            .into_iter()
            .map(|(id, fused_score, raw_score)| {
                let index = documents.iter().position(|d| d.id == id).unwrap_or(0);
                RerankedItem { index, document_id: id, relevance_score: fused_score, score: raw_score, fused_score: Some(fused_score) }
            })
            .collect();

        if let Some(top_k) = options.top_k {
            results.truncate(top_k);
        }

        RerankOutcome {
            success: true,
            provider: RerankerProvider::Rrf.canonical_name().to_string(),
            query: query.to_string(),
            total_processed: documents.len(),
            results,
            cached: false,
            model: None,
            error: None,
        }
    }

    /// Deterministic lexical-overlap scorer standing in for a cross-encoder
    /// model: no ONNX/candle runtime is in the dependency stack, so this
    /// provider scores by query/document token overlap instead of loading
    /// real weights.
    fn rerank_local(&self, query: &str, documents: &[RerankDocument], options: &RerankOptions) -> RerankOutcome {
        let query_tokens: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
        let denom = query_tokens.len().max(1) as f32;

        let mut results: Vec<RerankedItem> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let text = doc.effective_text().unwrap_or_default().to_lowercase();
                let hits = query_tokens.iter().filter(|t| text.contains(t.as_str())).count();
                let relevance_score = (hits as f32 / denom).clamp(0.0, 1.0);
                RerankedItem { index, document_id: doc.id.clone(), relevance_score, score: relevance_score, fused_score: None }
            })
            .collect();

        results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(Ordering::Equal));
        if let Some(top_k) = options.top_k {
            results.truncate(top_k);
        }

        RerankOutcome {
            success: true,
            provider: RerankerProvider::Local.canonical_name().to_string(),
            query: query.to_string(),
            total_processed: documents.len(),
            results,
            cached: false,
            model: options.model.clone(),
            error: None,
        }
    }

    async fn rerank_api(&self, query: &str, documents: &[RerankDocument], options: &RerankOptions) -> PampaxResult<RerankOutcome> {
        let api_url = options.api_url.clone().ok_or_else(|| {
            PampaxError::Rerank(RerankError::ProviderFailed { provider: "api".to_string(), reason: "no apiUrl configured".to_string() })
        })?;
        let api_key = options.api_key.clone().ok_or_else(|| {
            PampaxError::Rerank(RerankError::ProviderFailed { provider: "api".to_string(), reason: "no api key configured".to_string() })
        })?;
        let model = options.model.clone().unwrap_or_else(|| "rerank-default".to_string());
        let char_limit = options.max_tokens.map(|t| t * 4);

        let truncated_texts: Vec<String> = documents
            .iter()
            .map(|doc| {
                let text = doc.effective_text().unwrap_or_default();
                match char_limit {
                    Some(limit) if text.len() > limit => text.chars().take(limit).collect(),
                    _ => text.to_string(),
                }
            })
            .collect();

        let request = ApiRerankRequest {
            model: &model,
            query,
            documents: truncated_texts.iter().map(|text| ApiRerankDocument { text }).collect(),
            top_n: options.top_k,
        };

        let response = self
            .http
            .post(&api_url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| PampaxError::Rerank(RerankError::ProviderFailed { provider: "api".to_string(), reason: e.to_string() }))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PampaxError::Rerank(RerankError::ProviderFailed {
                provider: "api".to_string(),
                reason: format!("Rerank API error ({status})"),
            }));
        }

        let parsed: ApiRerankResponse = response
            .json()
            .await
            .map_err(|e| PampaxError::Rerank(RerankError::ProviderFailed { provider: "api".to_string(), reason: e.to_string() }))?;

        let mut results: Vec<RerankedItem> = parsed
            .results
            .into_iter()
            .filter_map(|entry| {
                documents.get(entry.index).map(|doc| RerankedItem {
                    index: entry.index,
                    document_id: doc.id.clone(),
                    relevance_score: entry.relevance_score,
                    score: entry.relevance_score,
                    fused_score: None,
                })
            })
            .collect();

        // Sorted locally even if the server already returned sorted results.
        results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(Ordering::Equal));
        if let Some(top_k) = options.top_k {
            results.truncate(top_k);
        }

        Ok(RerankOutcome {
            success: true,
            provider: RerankerProvider::Api.canonical_name().to_string(),
            query: query.to_string(),
            total_processed: documents.len(),
            results,
            cached: false,
            model: Some(model),
            error: None,
        })
    }

    /// Built when both the primary and fallback provider fail: preserves
    /// the documents' pre-rerank order and raw scores rather than
    /// propagating an error, matching the "reranker failure -> return
    /// pre-rerank order" disposition.
    fn pre_rerank_outcome(query: &str, documents: &[RerankDocument], reason: String) -> RerankOutcome {
        let results = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let score = doc.score.unwrap_or(0.0);
                RerankedItem { index, document_id: doc.id.clone(), relevance_score: score, score, fused_score: None }
            })
            .collect();

        RerankOutcome {
            success: false,
            provider: "none".to_string(),
            query: query.to_string(),
            total_processed: documents.len(),
            results,
            cached: false,
            model: None,
            error: Some(reason),
        }
    }
}

/// Escape hatch for callers that already hold an `Arc<Reranker>` and want
/// shared ownership across pipeline stages without cloning the HTTP client.
pub type SharedReranker = Arc<Reranker>;
