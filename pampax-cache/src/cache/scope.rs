//! Per-scope LRU+TTL map. One `ScopeState` backs one named scope (`search`,
//! `bundle`, `index`, `graph`, `rerank`, ...); scopes never share entries.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use pampax_core::identity::Timestamp;

/// Size/TTL policy for a single scope.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    pub max_size: usize,
    pub default_ttl: Duration,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

struct Slot {
    value: serde_json::Value,
    expires_at: Timestamp,
    last_accessed: Timestamp,
    size_estimate: usize,
}

/// Hit/miss/size counters for one scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl ScopeStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The mutable state for one cache scope: entries plus a monotonic access
/// clock used to find the least-recently-used entry on eviction.
pub struct ScopeState {
    config: ScopeConfig,
    entries: HashMap<String, Slot>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl ScopeState {
    pub fn new(config: ScopeConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Read-through get. Returns `(value, from_cache)` on hit, `None` on
    /// miss (expired entries are treated as absent per the TTL contract).
    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(slot) => now >= slot.expires_at,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }

        self.clock += 1;
        let clock = self.clock;
        let slot = self.entries.get_mut(key).expect("checked above");
        slot.last_accessed = now;
        let _ = clock;
        self.hits += 1;
        Some(slot.value.clone())
    }

    /// Insert a value, evicting the single least-recently-used entry if the
    /// scope is at capacity. `fetch_fn` returning null/undefined is the
    /// caller's responsibility not to call this with — no-negative-caching
    /// is enforced by the read-through layer above, not here.
    pub fn set(&mut self, key: String, value: serde_json::Value, ttl: Option<Duration>, size_estimate: usize) {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl.unwrap_or(self.config.default_ttl)).unwrap_or_default();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_size {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            Slot {
                value,
                expires_at,
                last_accessed: now,
                size_estimate,
            },
        );
    }

    fn evict_lru(&mut self) {
        if let Some(victim) = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_accessed)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&victim);
        }
    }

    /// Remove every entry whose TTL has elapsed. Called by the background
    /// sweeper; also safe to call inline (e.g. from tests).
    pub fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| now < slot.expires_at);
        before - self.entries.len()
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_size: usize) -> ScopeConfig {
        ScopeConfig {
            max_size,
            default_ttl: Duration::from_secs(3600),
        }
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let mut scope = ScopeState::new(config(2));
        scope.set("a".into(), serde_json::json!(1), None, 1);
        scope.set("b".into(), serde_json::json!(2), None, 1);
        assert_eq!(scope.get("a"), Some(serde_json::json!(1)));
        scope.set("c".into(), serde_json::json!(3), None, 1);

        assert_eq!(scope.get("a"), Some(serde_json::json!(1)));
        assert_eq!(scope.get("b"), None);
        assert_eq!(scope.get("c"), Some(serde_json::json!(3)));
    }

    #[test]
    fn ttl_zero_expires_immediately() {
        let mut scope = ScopeState::new(config(10));
        scope.set("a".into(), serde_json::json!(1), Some(Duration::from_secs(0)), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(scope.get("a"), None);
    }

    #[test]
    fn hit_rate_tracks_hits_and_misses() {
        let mut scope = ScopeState::new(config(10));
        scope.set("a".into(), serde_json::json!(1), None, 1);
        scope.get("a");
        scope.get("missing");
        let stats = scope.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sweep_expired_removes_only_expired_entries() {
        let mut scope = ScopeState::new(config(10));
        scope.set("stale".into(), serde_json::json!(1), Some(Duration::from_secs(0)), 1);
        scope.set("fresh".into(), serde_json::json!(2), Some(Duration::from_secs(3600)), 1);
        std::thread::sleep(Duration::from_millis(5));
        let removed = scope.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(scope.stats().size, 1);
    }
}
