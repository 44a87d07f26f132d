//! Request facade combining the response cache, retries and offline deferral.

use color_eyre::Result;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheResult, RequestCache, TtlPolicy};
use crate::config::Config;
use crate::error::RequestError;
use crate::net::{ConnectivityNotifier, NetworkStatusTracker};
use crate::retry::{RetryConfig, RetryExecutor, RetryQueue};

use super::client::ApiClient;

/// Queue that deferred mutations are replayed from on reconnect.
pub const MUTATION_QUEUE: &str = "mutations";

/// API client with transparent caching, retries and offline support.
///
/// Reads are served from cache when possible and fetched with retries
/// otherwise. Writes are retried, never cached, and invalidate cached reads
/// of the same base path.
#[derive(Clone)]
pub struct ResilientClient {
  api: ApiClient,
  cache: RequestCache,
  executor: RetryExecutor,
  network: NetworkStatusTracker,
}

impl ResilientClient {
  pub fn new(api: ApiClient, cache: RequestCache, executor: RetryExecutor, network: NetworkStatusTracker) -> Self {
    Self {
      api,
      cache,
      executor,
      network,
    }
  }

  /// Wire up the whole layer from configuration.
  ///
  /// Must be called within a tokio runtime.
  pub fn from_config(config: &Config, api_url: &str, notifier: &dyn ConnectivityNotifier) -> Result<Self> {
    let api = ApiClient::new(api_url, Config::get_api_key(), &config.api)?;
    let queue = RetryQueue::new().with_stagger(Duration::from_millis(config.retry.queue_stagger_ms));
    let network = NetworkStatusTracker::start(notifier, queue);
    let executor = RetryExecutor::new(RetryConfig::from(&config.retry)).with_network(network.clone());
    let cache = RequestCache::from_config(&config.cache);

    Ok(Self::new(api, cache, executor, network))
  }

  pub fn cache(&self) -> &RequestCache {
    &self.cache
  }

  pub fn network(&self) -> &NetworkStatusTracker {
    &self.network
  }

  pub fn queue(&self) -> &RetryQueue {
    self.network.queue()
  }

  /// Cached read with the TTL the path classifies to.
  pub async fn get(&self, path: &str) -> Result<CacheResult<Value>, RequestError> {
    self.read(path, None).await
  }

  /// Cached read with the short TTL, for volatile endpoints.
  pub async fn get_volatile(&self, path: &str) -> Result<CacheResult<Value>, RequestError> {
    self.read(path, Some(TtlPolicy::Short)).await
  }

  /// Dispatch by method: GET reads through the cache, everything else is a write.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<CacheResult<Value>, RequestError> {
    if method == Method::GET {
      self.read(path, None).await
    } else {
      self.write(method, path, body).await
    }
  }

  async fn read(&self, path: &str, policy: Option<TtlPolicy>) -> Result<CacheResult<Value>, RequestError> {
    let method = Method::GET.as_str();
    if let Some(cached) = self.cache.get(path, method, None) {
      return Ok(CacheResult::from_cache(cached));
    }

    // Concurrent misses on the same key each fetch; there is no request coalescing.
    let value = self
      .executor
      .with_retry(|| self.api.send(Method::GET, path, None), None)
      .await?;

    match policy {
      Some(policy) => self.cache.set_with_policy(path, method, value.clone(), None, policy),
      None => self.cache.set(path, method, value.clone(), None),
    }
    Ok(CacheResult::from_network(value))
  }

  async fn write(&self, method: Method, path: &str, body: Option<&Value>) -> Result<CacheResult<Value>, RequestError> {
    let value = self
      .executor
      .with_retry(|| self.api.send(method.clone(), path, body), None)
      .await?;

    self.invalidate_after_write(path);
    Ok(CacheResult::from_network(value))
  }

  /// Write that, if it fails while offline, is deferred to the mutation
  /// queue instead of failing. Deferred writes report [`CacheSource::Offline`]
  /// with a `null` body.
  ///
  /// [`CacheSource::Offline`]: crate::cache::CacheSource::Offline
  pub async fn send_or_queue(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<CacheResult<Value>, RequestError> {
    let sent = self
      .executor
      .with_offline_fallback(
        || {
          let send = self.api.send(method.clone(), path, body);
          async move { send.await.map(Some) }
        },
        || async {
          self.defer(method.clone(), path, body);
          None
        },
        None,
      )
      .await?;

    match sent {
      Some(value) => {
        self.invalidate_after_write(path);
        Ok(CacheResult::from_network(value))
      }
      None => Ok(CacheResult::offline(Value::Null)),
    }
  }

  fn defer(&self, method: Method, path: &str, body: Option<&Value>) {
    let api = self.api.clone();
    let cache = self.cache.clone();
    let path = path.to_string();
    let body = body.cloned();

    info!(%method, path = %path, "Deferring request until reconnect");
    self.queue().queue_for_retry(MUTATION_QUEUE, move || async move {
      let value = api.send(method, &path, body.as_ref()).await?;
      cache.invalidate(Some(&path));
      Ok::<_, RequestError>(value)
    });
  }

  fn invalidate_after_write(&self, path: &str) {
    let removed = self.cache.invalidate(Some(path));
    debug!(path, removed, "Invalidated cache after write");
  }
}
