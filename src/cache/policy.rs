//! TTL classification and cache key derivation.

use chrono::TimeDelta;
use serde_json::Value;

use crate::config::CacheConfig;

/// How long a response may be served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
  /// Not cacheable
  None,
  /// Volatile endpoints, opted into by the caller
  Short,
  Default,
  /// Slow-changing resources
  Long,
}

/// Pure mapping from `(method, path)` to a [`TtlPolicy`] and its duration.
#[derive(Debug, Clone)]
pub struct TtlClassifier {
  default_ttl: TimeDelta,
  long_ttl: TimeDelta,
  short_ttl: TimeDelta,
  slow_changing_paths: Vec<String>,
}

impl Default for TtlClassifier {
  fn default() -> Self {
    Self::from(&CacheConfig::default())
  }
}

impl From<&CacheConfig> for TtlClassifier {
  fn from(config: &CacheConfig) -> Self {
    Self {
      default_ttl: TimeDelta::seconds(config.default_ttl_secs),
      long_ttl: TimeDelta::seconds(config.long_ttl_secs),
      short_ttl: TimeDelta::seconds(config.short_ttl_secs),
      slow_changing_paths: config.slow_changing_paths.clone(),
    }
  }
}

impl TtlClassifier {
  /// Only GET is cacheable; GETs on slow-changing paths get the long TTL.
  pub fn classify(&self, method: &str, url: &str) -> TtlPolicy {
    if !method.eq_ignore_ascii_case("GET") {
      return TtlPolicy::None;
    }
    let path = base_path(url);
    if self
      .slow_changing_paths
      .iter()
      .any(|p| path.contains(p.as_str()))
    {
      TtlPolicy::Long
    } else {
      TtlPolicy::Default
    }
  }

  pub fn ttl(&self, policy: TtlPolicy) -> TimeDelta {
    match policy {
      TtlPolicy::None => TimeDelta::zero(),
      TtlPolicy::Short => self.short_ttl,
      TtlPolicy::Default => self.default_ttl,
      TtlPolicy::Long => self.long_ttl,
    }
  }

  pub fn ttl_for(&self, method: &str, url: &str) -> TimeDelta {
    self.ttl(self.classify(method, url))
  }
}

/// `"{METHOD}:{URL}:{JSON(body) | ''}"`.
///
/// Object keys serialize in sorted order, so equal bodies give equal keys.
pub fn cache_key(method: &str, url: &str, body: Option<&Value>) -> String {
  let body = body.map(Value::to_string).unwrap_or_default();
  format!("{}:{}:{}", method.to_ascii_uppercase(), url, body)
}

/// URL without its query string.
pub fn base_path(url: &str) -> &str {
  url.split_once('?').map_or(url, |(path, _)| path)
}
