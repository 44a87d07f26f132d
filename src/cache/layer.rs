//! Request-level cache: keys requests by method, URL and body, and picks TTLs.

use serde_json::Value;

use crate::config::CacheConfig;

use super::policy::{base_path, cache_key, TtlClassifier, TtlPolicy};
use super::store::ResponseCache;
use super::traits::CacheStats;

/// Cache for API responses keyed by request.
///
/// This layer sits between the request facade and the raw [`ResponseCache`],
/// turning requests into keys and TTLs.
#[derive(Clone)]
pub struct RequestCache {
  store: ResponseCache<Value>,
  classifier: TtlClassifier,
}

impl RequestCache {
  pub fn new(store: ResponseCache<Value>, classifier: TtlClassifier) -> Self {
    Self { store, classifier }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(ResponseCache::from_config(config), TtlClassifier::from(config))
  }

  /// The underlying store, e.g. for snapshots.
  pub fn store(&self) -> &ResponseCache<Value> {
    &self.store
  }

  pub fn get(&self, url: &str, method: &str, body: Option<&Value>) -> Option<Value> {
    if !self.should_cache(url, method) {
      return None;
    }
    self.store.get(&cache_key(method, url, body))
  }

  /// Store a response with the TTL its request classifies to.
  pub fn set(&self, url: &str, method: &str, value: Value, body: Option<&Value>) {
    let policy = self.classifier.classify(method, url);
    self.set_with_policy(url, method, value, body, policy);
  }

  /// Store a response with an explicit policy, e.g. [`TtlPolicy::Short`] for volatile endpoints.
  ///
  /// Non-GET requests are never stored, whatever the policy.
  pub fn set_with_policy(
    &self,
    url: &str,
    method: &str,
    value: Value,
    body: Option<&Value>,
    policy: TtlPolicy,
  ) {
    if !self.should_cache(url, method) {
      return;
    }
    let ttl = self.classifier.ttl(policy);
    self.store.set(&cache_key(method, url, body), value, ttl);
  }

  pub fn should_cache(&self, url: &str, method: &str) -> bool {
    self.classifier.classify(method, url) != TtlPolicy::None
  }

  /// Drop entries for `url`'s base path, or everything without a URL.
  pub fn invalidate(&self, url: Option<&str>) -> usize {
    self.store.invalidate(url.map(base_path))
  }

  pub fn clear(&self) {
    self.store.clear();
  }

  pub fn stats(&self) -> CacheStats {
    self.store.stats()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn request_cache() -> RequestCache {
    RequestCache::new(ResponseCache::new(100, 0.0), TtlClassifier::default())
  }

  #[test]
  fn test_get_set_by_request() {
    let cache = request_cache();
    cache.set("/gates", "GET", json!(["a"]), None);

    assert_eq!(cache.get("/gates", "get", None), Some(json!(["a"])));
    assert_eq!(cache.get("/gates", "GET", Some(&json!({"page": 2}))), None);
  }

  #[test]
  fn test_mutations_are_never_stored() {
    let cache = request_cache();
    cache.set("/gates", "POST", json!({}), None);
    cache.set_with_policy("/gates", "PUT", json!({}), None, TtlPolicy::Long);

    assert!(!cache.should_cache("/gates", "POST"));
    assert_eq!(cache.stats().size, 0);
  }

  #[test]
  fn test_slow_changing_paths_get_long_ttl() {
    let cache = request_cache();
    cache.set("/experiments", "GET", json!([]), None);
    cache.set("/users", "GET", json!([]), None);
    cache.set_with_policy("/metrics", "GET", json!([]), None, TtlPolicy::Short);

    let stats = cache.stats();
    let ttl_of = |key: &str| stats.entries.iter().find(|e| e.key == key).unwrap().ttl_ms;
    assert_eq!(ttl_of("GET:/experiments:"), 3_600_000);
    assert_eq!(ttl_of("GET:/users:"), 300_000);
    assert_eq!(ttl_of("GET:/metrics:"), 30_000);
  }

  #[test]
  fn test_invalidate_uses_base_path() {
    let cache = request_cache();
    cache.set("/gates/a?expand=rules", "GET", json!(1), None);
    cache.set("/gates/b", "GET", json!(2), None);

    assert_eq!(cache.invalidate(Some("/gates/a?anything")), 1);
    assert_eq!(cache.get("/gates/b", "GET", None), Some(json!(2)));

    cache.clear();
    assert_eq!(cache.stats().size, 0);
  }
}
