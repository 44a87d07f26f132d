//! Response caching for API reads.
//!
//! This module provides:
//! - A TTL cache with probabilistic, size-bounded eviction
//! - TTL classification by method and path
//! - A request-keyed layer used by the request facade
//! - Snapshots to a host key-value store, so a restart keeps unexpired entries

mod layer;
mod policy;
mod storage;
mod store;
mod traits;

pub use layer::RequestCache;
pub use policy::{base_path, cache_key, TtlClassifier, TtlPolicy};
pub use storage::{KeyValueStore, NoopStore, SqliteStore};
pub use store::ResponseCache;
pub use traits::{CacheEntry, CacheResult, CacheSource, CacheStats, EntryStats};
