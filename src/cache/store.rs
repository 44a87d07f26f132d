//! In-memory TTL cache with size-bounded eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::{eyre::eyre, Result};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;

use super::storage::KeyValueStore;
use super::traits::{CacheEntry, CacheStats, EntryStats};

/// Key under which snapshots are written to a [`KeyValueStore`].
const SNAPSHOT_KEY: &str = "response_cache";

/// Serialized form of an entry.
#[derive(Serialize, Deserialize)]
struct SnapshotEntry<T> {
  key: String,
  value: T,
  stored_at: DateTime<Utc>,
  ttl_ms: i64,
}

struct CacheState<T> {
  entries: HashMap<String, CacheEntry<T>>,
  /// Insertion counter, breaks `stored_at` ties during eviction
  next_seq: u64,
}

/// Key to value store with per-entry TTL.
///
/// Expired entries are treated as absent. Writes run the eviction pass with a
/// configurable probability, so the entry count can briefly exceed
/// `max_size` in exchange for cheaper writes.
///
/// Cloning shares the same entries.
pub struct ResponseCache<T> {
  state: Arc<Mutex<CacheState<T>>>,
  max_size: usize,
  eviction_probability: f64,
}

impl<T> Clone for ResponseCache<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      max_size: self.max_size,
      eviction_probability: self.eviction_probability,
    }
  }
}

impl<T: Clone> ResponseCache<T> {
  pub fn new(max_size: usize, eviction_probability: f64) -> Self {
    Self {
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        next_seq: 0,
      })),
      max_size,
      eviction_probability: eviction_probability.clamp(0.0, 1.0),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(config.max_size, config.eviction_probability)
  }

  fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Value for `key` if present and unexpired. Expired entries are removed.
  pub fn get(&self, key: &str) -> Option<T> {
    let mut state = self.lock();
    let now = Utc::now();

    match state.entries.get(key) {
      Some(entry) if entry.is_valid_at(now) => {
        debug!(key, "Cache hit");
        Some(entry.value.clone())
      }
      Some(_) => {
        state.entries.remove(key);
        debug!(key, "Cache entry expired");
        None
      }
      None => {
        debug!(key, "Cache miss");
        None
      }
    }
  }

  /// Store `value` for `ttl`. A zero or negative TTL means not cacheable.
  pub fn set(&self, key: &str, value: T, ttl: TimeDelta) {
    self.insert(key, value, ttl, Utc::now());

    if self.eviction_probability > 0.0 && rand::thread_rng().gen_bool(self.eviction_probability) {
      self.evict_expired();
    }
  }

  fn insert(&self, key: &str, value: T, ttl: TimeDelta, stored_at: DateTime<Utc>) {
    if ttl <= TimeDelta::zero() {
      return;
    }

    let mut state = self.lock();
    let seq = state.next_seq;
    state.next_seq += 1;
    state.entries.insert(
      key.to_string(),
      CacheEntry {
        key: key.to_string(),
        value,
        stored_at,
        ttl,
        seq,
      },
    );
  }

  /// Remove entries whose key contains `pattern`, or all entries without one.
  ///
  /// Returns the number of removed entries.
  pub fn invalidate(&self, pattern: Option<&str>) -> usize {
    let mut state = self.lock();
    let before = state.entries.len();

    match pattern {
      Some(pattern) => state.entries.retain(|key, _| !key.contains(pattern)),
      None => state.entries.clear(),
    }

    let removed = before - state.entries.len();
    if removed > 0 {
      debug!(pattern = pattern.unwrap_or("*"), removed, "Invalidated cache entries");
    }
    removed
  }

  pub fn clear(&self) {
    self.invalidate(None);
  }

  /// Remove expired entries, then trim to half of `max_size` oldest-first
  /// if the cache is still over `max_size`.
  pub fn evict_expired(&self) -> usize {
    let mut state = self.lock();
    let now = Utc::now();
    let before = state.entries.len();

    state.entries.retain(|_, entry| entry.is_valid_at(now));

    if state.entries.len() > self.max_size {
      let target = self.max_size / 2;
      let mut by_age: Vec<(DateTime<Utc>, u64, String)> = state
        .entries
        .values()
        .map(|e| (e.stored_at, e.seq, e.key.clone()))
        .collect();
      by_age.sort();

      let excess = state.entries.len() - target;
      for (_, _, key) in by_age.into_iter().take(excess) {
        state.entries.remove(&key);
      }
    }

    let removed = before - state.entries.len();
    if removed > 0 {
      debug!(removed, remaining = state.entries.len(), "Evicted cache entries");
    }
    removed
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.lock();
    let now = Utc::now();
    let mut entries: Vec<EntryStats> = state
      .entries
      .values()
      .map(|e| EntryStats {
        key: e.key.clone(),
        age_ms: (now - e.stored_at).num_milliseconds(),
        ttl_ms: e.ttl.num_milliseconds(),
      })
      .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    CacheStats {
      size: state.entries.len(),
      entries,
    }
  }
}

impl<T: Clone + Serialize + DeserializeOwned> ResponseCache<T> {
  /// Write all unexpired entries to `store`.
  pub fn save_snapshot(&self, store: &dyn KeyValueStore) -> Result<usize> {
    let snapshot: Vec<SnapshotEntry<T>> = {
      let state = self.lock();
      let now = Utc::now();
      let mut live: Vec<&CacheEntry<T>> = state
        .entries
        .values()
        .filter(|e| e.is_valid_at(now))
        .collect();
      live.sort_by_key(|e| (e.stored_at, e.seq));
      live
        .into_iter()
        .map(|e| SnapshotEntry {
          key: e.key.clone(),
          value: e.value.clone(),
          stored_at: e.stored_at,
          ttl_ms: e.ttl.num_milliseconds(),
        })
        .collect()
    };

    let bytes = serde_json::to_vec(&snapshot).map_err(|e| eyre!("Failed to encode cache snapshot: {}", e))?;
    store.put(SNAPSHOT_KEY, &bytes)?;
    Ok(snapshot.len())
  }

  /// Load entries saved by [`save_snapshot`](Self::save_snapshot).
  ///
  /// Entries keep their original store time, so anything that expired in the
  /// meantime is skipped. A corrupt snapshot is discarded.
  pub fn restore_snapshot(&self, store: &dyn KeyValueStore) -> Result<usize> {
    let Some(bytes) = store.get(SNAPSHOT_KEY)? else {
      return Ok(0);
    };

    let snapshot: Vec<SnapshotEntry<T>> = match serde_json::from_slice(&bytes) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!(error = %e, "Discarding unreadable cache snapshot");
        store.delete(SNAPSHOT_KEY)?;
        return Ok(0);
      }
    };

    let now = Utc::now();
    let mut restored = 0;
    for entry in snapshot {
      let ttl = TimeDelta::milliseconds(entry.ttl_ms);
      if now - entry.stored_at < ttl {
        self.insert(&entry.key, entry.value, ttl, entry.stored_at);
        restored += 1;
      }
    }
    Ok(restored)
  }
}
