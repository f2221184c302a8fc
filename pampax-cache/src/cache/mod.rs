//! Namespaced, read-through LRU+TTL cache.
//!
//! Organized into independent scopes (`search`, `bundle`, `index`, `graph`,
//! `rerank`, ...), each an independent LRU map with its own size bound and
//! default TTL. `NamespacedCache::get_or_fetch` is the read-through entry
//! point every pipeline stage should go through.

pub mod scope;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pampax_core::error::{CacheError, PampaxError, PampaxResult};
use pampax_core::health::HealthCheck;
use pampax_core::model::CacheKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub use scope::{ScopeConfig, ScopeStats};
use scope::ScopeState;

/// Current cache namespace version. Bumping this (via `NamespacedCache::new`
/// being given a different version) invalidates every existing key
/// atomically, since the version is embedded in every `CacheKey`.
pub const CACHE_VERSION: u32 = pampax_core::model::CACHE_KEY_VERSION;

/// Aggregate stats across all scopes.
#[derive(Debug, Clone, Default)]
pub struct GlobalStats {
    pub version: u32,
    pub namespaces: HashMap<String, ScopeStats>,
    pub total_hits: u64,
    pub total_misses: u64,
    pub global_hit_rate: f64,
}

struct Inner {
    scopes: RwLock<HashMap<String, ScopeState>>,
    scope_configs: HashMap<String, ScopeConfig>,
}

/// The namespaced cache. Cheap to clone — internally `Arc`-backed so the
/// background sweeper and every pipeline stage can share one instance.
#[derive(Clone)]
pub struct NamespacedCache {
    inner: Arc<Inner>,
}

impl NamespacedCache {
    /// Build a cache with one `ScopeConfig` per named scope. Scopes not
    /// listed fall back to `ScopeConfig::default()` the first time they're
    /// touched.
    pub fn new(scope_configs: HashMap<String, ScopeConfig>) -> Self {
        Self {
            inner: Arc::new(Inner {
                scopes: RwLock::new(HashMap::new()),
                scope_configs,
            }),
        }
    }

    /// Convenience constructor for the five scopes the pipeline uses, all
    /// with the same size/TTL policy.
    pub fn with_default_scopes(max_size: usize, default_ttl: Duration) -> Self {
        let config = ScopeConfig {
            max_size,
            default_ttl,
        };
        let mut scope_configs = HashMap::new();
        for scope in ["search", "bundle", "index", "graph", "rerank"] {
            scope_configs.insert(scope.to_string(), config.clone());
        }
        Self::new(scope_configs)
    }

    fn config_for(&self, scope: &str) -> ScopeConfig {
        self.inner
            .scope_configs
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Read-through get. On cache hit, returns `(Some(value), true)`. On
    /// miss, invokes `fetch`; a `None` result is never cached, so the next
    /// call re-invokes `fetch` (no negative caching). Errors from `fetch`
    /// propagate unchanged.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        scope: &str,
        key: &CacheKey,
        fetch: F,
    ) -> PampaxResult<(Option<T>, bool)>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PampaxResult<Option<T>>>,
    {
        if let Some(hit) = self.raw_get(scope, key.as_str()).await? {
            let value: T = serde_json::from_value(hit).map_err(|e| {
                PampaxError::Cache(CacheError::BackendFailure {
                    scope: scope.to_string(),
                    reason: format!("stored value failed to deserialize: {e}"),
                })
            })?;
            return Ok((Some(value), true));
        }

        match fetch().await? {
            Some(value) => {
                self.raw_set(scope, key.as_str(), &value, None).await?;
                Ok((Some(value), false))
            }
            None => Ok((None, false)),
        }
    }

    /// Populate the cache directly, bypassing `fetch`. Used to keep the
    /// cache warm after a write even when `cache_enabled=false` on the hot
    /// read path.
    pub async fn put<T: Serialize>(&self, scope: &str, key: &CacheKey, value: &T, ttl: Option<Duration>) -> PampaxResult<()> {
        self.raw_set(scope, key.as_str(), value, ttl).await
    }

    async fn raw_get(&self, scope: &str, key: &str) -> PampaxResult<Option<serde_json::Value>> {
        let mut scopes = self.inner.scopes.write().await;
        let state = scopes
            .entry(scope.to_string())
            .or_insert_with(|| ScopeState::new(self.config_for(scope)));
        Ok(state.get(key))
    }

    async fn raw_set<T: Serialize>(&self, scope: &str, key: &str, value: &T, ttl: Option<Duration>) -> PampaxResult<()> {
        let serialized = serde_json::to_value(value).map_err(|e| {
            PampaxError::Cache(CacheError::BackendFailure {
                scope: scope.to_string(),
                reason: format!("value failed to serialize: {e}"),
            })
        })?;
        let size_estimate = serialized.to_string().len();
        let mut scopes = self.inner.scopes.write().await;
        let state = scopes
            .entry(scope.to_string())
            .or_insert_with(|| ScopeState::new(self.config_for(scope)));
        state.set(key.to_string(), serialized, ttl, size_estimate);
        Ok(())
    }

    pub async fn invalidate(&self, scope: &str, key: &CacheKey) {
        let mut scopes = self.inner.scopes.write().await;
        if let Some(state) = scopes.get_mut(scope) {
            state.remove(key.as_str());
        }
    }

    pub async fn clear_scope(&self, scope: &str) {
        let mut scopes = self.inner.scopes.write().await;
        if let Some(state) = scopes.get_mut(scope) {
            state.clear();
        }
    }

    /// Remove expired entries across every scope. Called by the background
    /// sweeper on an interval, and safe to call directly (e.g. in tests).
    pub async fn sweep(&self) -> usize {
        let mut scopes = self.inner.scopes.write().await;
        scopes.values_mut().map(ScopeState::sweep_expired).sum()
    }

    pub async fn stats(&self) -> GlobalStats {
        let scopes = self.inner.scopes.read().await;
        let mut namespaces = HashMap::new();
        let mut total_hits = 0;
        let mut total_misses = 0;
        for (name, state) in scopes.iter() {
            let stats = state.stats();
            total_hits += stats.hits;
            total_misses += stats.misses;
            namespaces.insert(name.clone(), stats);
        }
        let global_hit_rate = if total_hits + total_misses == 0 {
            0.0
        } else {
            total_hits as f64 / (total_hits + total_misses) as f64
        };
        GlobalStats {
            version: CACHE_VERSION,
            namespaces,
            total_hits,
            total_misses,
            global_hit_rate,
        }
    }

    pub async fn health(&self) -> HealthCheck {
        let stats = self.stats().await;
        let mut issues = Vec::new();
        if stats.global_hit_rate < 0.1 && stats.total_hits + stats.total_misses > 100 {
            issues.push("global hit rate below 10%".to_string());
        }

        let mut check = if issues.is_empty() {
            HealthCheck::healthy("namespaced_cache")
        } else {
            HealthCheck::degraded("namespaced_cache", issues.join("; "))
        };
        check = check.with_metadata("total_hits", serde_json::json!(stats.total_hits));
        check = check.with_metadata("total_misses", serde_json::json!(stats.total_misses));
        check
    }

    /// Start a background sweeper that removes expired entries on an
    /// interval. Returns a handle whose `shutdown()` stops the task.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let cache = self.clone();
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep().await;
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
        SweeperHandle {
            shutdown: Some(tx),
            task: Some(task),
        }
    }
}

/// Handle to a running background sweeper task. Dropping this without
/// calling `shutdown()` leaves the sweeper running.
pub struct SweeperHandle {
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_through_miss_then_hit() {
        let cache = NamespacedCache::with_default_scopes(10, Duration::from_secs(60));
        let key = CacheKey::generate("search", &serde_json::json!({"q": "foo"})).unwrap();

        let (value, from_cache) = cache
            .get_or_fetch("search", &key, || async { Ok(Some(42i32)) })
            .await
            .unwrap();
        assert_eq!(value, Some(42));
        assert!(!from_cache);

        let (value, from_cache) = cache
            .get_or_fetch("search", &key, || async { Ok(Some(99i32)) })
            .await
            .unwrap();
        assert_eq!(value, Some(42));
        assert!(from_cache);
    }

    #[tokio::test]
    async fn none_result_is_never_cached() {
        let cache = NamespacedCache::with_default_scopes(10, Duration::from_secs(60));
        let key = CacheKey::generate("search", &serde_json::json!({"q": "bar"})).unwrap();

        let calls = std::sync::atomic::AtomicU32::new(0);
        for _ in 0..2 {
            let (value, _) = cache
                .get_or_fetch("search", &key, || {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async { Ok::<Option<i32>, PampaxError>(None) }
                })
                .await
                .unwrap();
            assert_eq!(value, None);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_error_propagates_unchanged() {
        let cache = NamespacedCache::with_default_scopes(10, Duration::from_secs(60));
        let key = CacheKey::generate("search", &serde_json::json!({"q": "baz"})).unwrap();

        let result = cache
            .get_or_fetch("search", &key, || async {
                Err::<Option<i32>, _>(PampaxError::Retrieval(
                    pampax_core::error::RetrievalError::AllSourcesFailed,
                ))
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_hits_and_misses() {
        let cache = NamespacedCache::with_default_scopes(10, Duration::from_secs(60));
        let key = CacheKey::generate("bundle", &serde_json::json!({"q": "x"})).unwrap();
        cache
            .get_or_fetch("bundle", &key, || async { Ok(Some(1i32)) })
            .await
            .unwrap();
        cache
            .get_or_fetch("bundle", &key, || async { Ok(Some(1i32)) })
            .await
            .unwrap();

        let stats = cache.stats().await;
        let bundle_stats = stats.namespaces.get("bundle").unwrap();
        assert_eq!(bundle_stats.hits, 1);
        assert_eq!(bundle_stats.misses, 1);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries_in_background() {
        let cache = NamespacedCache::with_default_scopes(10, Duration::from_millis(5));
        let key = CacheKey::generate("graph", &serde_json::json!({"q": "sweep"})).unwrap();
        cache
            .get_or_fetch("graph", &key, || async { Ok(Some(1i32)) })
            .await
            .unwrap();

        let handle = cache.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        let stats = cache.stats().await;
        assert_eq!(stats.namespaces.get("graph").unwrap().size, 0);
    }
}
