//! Namespaced LRU+TTL cache and the storage contract the core requires of
//! the indexer/DB layer.

pub mod cache;
pub mod storage;

pub use cache::{GlobalStats, NamespacedCache, ScopeConfig, ScopeStats, SweeperHandle};
pub use storage::{all_sources_failed, search_soft_fail, MemoryFact, MockStorageBackend, SearchOptions, StorageBackend};
