//! Core types for the caching system.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// A stored value with its storage time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub key: String,
  pub value: T,
  pub stored_at: DateTime<Utc>,
  pub ttl: TimeDelta,
  pub(crate) seq: u64,
}

impl<T> CacheEntry<T> {
  /// An entry is valid while `now - stored_at < ttl`.
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    now - self.stored_at < self.ttl
  }
}

/// Summary of cache contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub size: usize,
  pub entries: Vec<EntryStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
  pub key: String,
  pub age_ms: i64,
  pub ttl_ms: i64,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Unexpired data from cache
  Cache,
  /// Network unavailable, a fallback was served or the request was deferred
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_validity_boundary() {
    let stored_at = Utc::now();
    let entry = CacheEntry {
      key: "k".to_string(),
      value: (),
      stored_at,
      ttl: TimeDelta::seconds(10),
      seq: 0,
    };

    assert!(entry.is_valid_at(stored_at + TimeDelta::seconds(9)));
    assert!(!entry.is_valid_at(stored_at + TimeDelta::seconds(10)));
  }
}
