//! Retrying execution of fallible async operations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{info, warn};

use crate::config::RetrySettings;
use crate::error::RequestError;
use crate::net::NetworkStatusTracker;

use super::backoff::BackoffPolicy;

/// Callback invoked before each retry with the failed attempt number and its error.
pub type RetryHook = Arc<dyn Fn(u32, &RequestError) + Send + Sync>;

/// Decides whether a failure is worth another attempt.
#[derive(Clone, Default)]
pub enum RetryPredicate {
  /// Transient error kinds; untyped errors by the built-in message patterns
  #[default]
  Default,
  /// Case-insensitive substring match on the error message
  Substrings(Vec<String>),
  Custom(Arc<dyn Fn(&RequestError) -> bool + Send + Sync>),
}

impl RetryPredicate {
  pub fn matches(&self, err: &RequestError) -> bool {
    match self {
      RetryPredicate::Default => err.is_retryable(),
      RetryPredicate::Substrings(patterns) => err.message_contains_any(patterns),
      RetryPredicate::Custom(f) => f(err),
    }
  }
}

impl fmt::Debug for RetryPredicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryPredicate::Default => f.write_str("Default"),
      RetryPredicate::Substrings(patterns) => f.debug_tuple("Substrings").field(patterns).finish(),
      RetryPredicate::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// Retry settings for one call.
#[derive(Clone)]
pub struct RetryConfig {
  /// Retries after the first attempt; total attempts are `max_retries + 1`
  pub max_retries: u32,
  pub backoff: BackoffPolicy,
  pub retryable: RetryPredicate,
  pub on_retry: Option<RetryHook>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: BackoffPolicy::default(),
      retryable: RetryPredicate::Default,
      on_retry: None,
    }
  }
}

impl fmt::Debug for RetryConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryConfig")
      .field("max_retries", &self.max_retries)
      .field("backoff", &self.backoff)
      .field("retryable", &self.retryable)
      .field("on_retry", &self.on_retry.is_some())
      .finish()
  }
}

impl From<&RetrySettings> for RetryConfig {
  fn from(settings: &RetrySettings) -> Self {
    Self {
      max_retries: settings.max_retries,
      backoff: BackoffPolicy::new(
        Duration::from_millis(settings.base_delay_ms),
        Duration::from_millis(settings.max_delay_ms),
        settings.backoff_multiplier,
      ),
      ..Self::default()
    }
  }
}

impl RetryConfig {
  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
    self.backoff = BackoffPolicy::new(base_delay, max_delay, multiplier);
    self
  }

  /// Retry only errors whose message contains one of `patterns`.
  pub fn with_retryable_errors<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
    self.retryable = RetryPredicate::Substrings(patterns.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_predicate<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&RequestError) -> bool + Send + Sync + 'static,
  {
    self.retryable = RetryPredicate::Custom(Arc::new(predicate));
    self
  }

  pub fn with_on_retry<F>(mut self, hook: F) -> Self
  where
    F: Fn(u32, &RequestError) + Send + Sync + 'static,
  {
    self.on_retry = Some(Arc::new(hook));
    self
  }
}

/// Runs operations with an attempt budget, error classification and backoff.
///
/// With a [`NetworkStatusTracker`] attached, retries while offline fail fast
/// with a synthetic offline error instead of calling the operation.
#[derive(Clone, Default)]
pub struct RetryExecutor {
  network: Option<NetworkStatusTracker>,
  defaults: RetryConfig,
}

impl RetryExecutor {
  /// Executor without connectivity awareness.
  pub fn new(defaults: RetryConfig) -> Self {
    Self {
      network: None,
      defaults,
    }
  }

  pub fn with_network(mut self, network: NetworkStatusTracker) -> Self {
    self.network = Some(network);
    self
  }

  fn is_online(&self) -> bool {
    self.network.as_ref().map_or(true, |n| n.is_online())
  }

  /// Run `op` until it succeeds, fails with a non-retryable error, or exhausts
  /// the budget. On exhaustion the error of the final attempt is returned.
  pub async fn with_retry<T, F, Fut>(&self, mut op: F, config: Option<&RetryConfig>) -> Result<T, RequestError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
  {
    let config = config.unwrap_or(&self.defaults);
    let mut attempt: u32 = 1;

    loop {
      let result = if attempt > 1 && !self.is_online() {
        Err(RequestError::offline())
      } else {
        op().await
      };

      let err = match result {
        Ok(value) => {
          if attempt > 1 {
            info!(attempt, "Operation succeeded after retry");
          }
          return Ok(value);
        }
        Err(err) => err,
      };

      if attempt > config.max_retries {
        warn!(attempts = attempt, error = %err, "Retry budget exhausted");
        return Err(err);
      }

      if !config.retryable.matches(&err) {
        return Err(err);
      }

      if let Some(hook) = &config.on_retry {
        hook(attempt, &err);
      }

      let delay = config.backoff.delay(attempt - 1);
      warn!(
        attempt,
        max_attempts = config.max_retries + 1,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "Attempt failed, retrying"
      );
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }

  /// Wrap `f` so every call runs under [`with_retry`](Self::with_retry).
  pub fn create_retryable<A, T, F, Fut>(
    &self,
    f: F,
    config: Option<RetryConfig>,
  ) -> impl Fn(A) -> BoxFuture<'static, Result<T, RequestError>>
  where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
  {
    let executor = self.clone();
    let config = config.unwrap_or_else(|| self.defaults.clone());

    move |args: A| {
      let executor = executor.clone();
      let config = config.clone();
      let f = f.clone();
      async move {
        executor
          .with_retry(|| f(args.clone()), Some(&config))
          .await
      }
      .boxed()
    }
  }

  /// Run every operation under its own retry loop.
  ///
  /// Results keep the input order; one operation's failure never affects the others.
  pub async fn batch_retry<T, F, Fut>(&self, ops: Vec<F>, config: Option<&RetryConfig>) -> Vec<Result<T, RequestError>>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
  {
    join_all(ops.into_iter().map(|op| self.with_retry(op, config))).await
  }

  /// Run `op` with retries; if it fails while offline, return `fallback()` instead.
  ///
  /// Failures while online are returned unchanged.
  pub async fn with_offline_fallback<T, F, Fut, G, GFut>(
    &self,
    op: F,
    fallback: G,
    config: Option<&RetryConfig>,
  ) -> Result<T, RequestError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = T>,
  {
    match self.with_retry(op, config).await {
      Ok(value) => Ok(value),
      Err(err) if !self.is_online() => {
        info!(error = %err, "Operation failed while offline, using fallback");
        Ok(fallback().await)
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::retry::RetryQueue;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;
  use std::time::Instant;

  fn fast() -> RetryConfig {
    RetryConfig::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5), 2.0)
  }

  fn offline_tracker() -> NetworkStatusTracker {
    NetworkStatusTracker::detached(false, RetryQueue::new())
  }

  #[tokio::test]
  async fn test_recovers_after_two_failures() {
    let calls = AtomicU32::new(0);
    let hook_calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = hook_calls.clone();
    let config = fast().with_on_retry(move |attempt, _| recorded.lock().unwrap().push(attempt));

    let result = RetryExecutor::default()
      .with_retry(
        || {
          let n = calls.fetch_add(1, Ordering::SeqCst);
          async move {
            if n < 2 {
              Err(RequestError::timeout("request timeout"))
            } else {
              Ok("done")
            }
          }
        },
        Some(&config),
      )
      .await;

    assert_eq!(result, Ok("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*hook_calls.lock().unwrap(), vec![1, 2]);
  }

  #[tokio::test]
  async fn test_non_retryable_short_circuits() {
    let calls = AtomicU32::new(0);
    let config = fast().with_retryable_errors(["timeout"]);

    let result: Result<(), _> = RetryExecutor::default()
      .with_retry(
        || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Err(RequestError::other("validation error")) }
        },
        Some(&config),
      )
      .await;

    assert_eq!(result.unwrap_err().message, "validation error");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_validation_error_with_transient_wording_is_not_retried() {
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = RetryExecutor::new(fast())
      .with_retry(
        || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Err(RequestError::from_status(422, "field 'timeout' must be positive")) }
        },
        None,
      )
      .await;

    assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_custom_predicate_selects_kinds() {
    let config = fast().with_predicate(|err| err.kind == ErrorKind::RateLimited);
    let executor = RetryExecutor::default();

    let limited = AtomicU32::new(0);
    let result = executor
      .with_retry(
        || {
          let n = limited.fetch_add(1, Ordering::SeqCst);
          async move {
            if n == 0 {
              Err(RequestError::from_status(429, ""))
            } else {
              Ok(n)
            }
          }
        },
        Some(&config),
      )
      .await;
    assert_eq!(result, Ok(1));
    assert_eq!(limited.load(Ordering::SeqCst), 2);

    // Transient by default, but this predicate rejects it
    let server_errors = AtomicU32::new(0);
    let result: Result<(), _> = executor
      .with_retry(
        || {
          server_errors.fetch_add(1, Ordering::SeqCst);
          async { Err(RequestError::from_status(503, "")) }
        },
        Some(&config),
      )
      .await;
    assert_eq!(result.unwrap_err().kind, ErrorKind::Server(503));
    assert_eq!(server_errors.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_exhaustion_returns_last_error() {
    let calls = AtomicU32::new(0);
    let config = fast().with_max_retries(2);

    let result: Result<(), _> = RetryExecutor::default()
      .with_retry(
        || {
          let n = calls.fetch_add(1, Ordering::SeqCst);
          async move { Err(RequestError::from_status(503, &format!("attempt {}", n + 1))) }
        },
        Some(&config),
      )
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.unwrap_err().message, "HTTP 503: attempt 3");
  }

  #[tokio::test]
  async fn test_zero_retries_runs_once() {
    let calls = AtomicU32::new(0);
    let config = fast().with_max_retries(0);

    let result: Result<(), _> = RetryExecutor::default()
      .with_retry(
        || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Err(RequestError::network("network down")) }
        },
        Some(&config),
      )
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_backoff_delays_elapse() {
    let calls = AtomicU32::new(0);
    let config = RetryConfig::default()
      .with_max_retries(3)
      .with_backoff(Duration::from_millis(100), Duration::from_secs(30), 2.0);

    let started = Instant::now();
    let result = RetryExecutor::default()
      .with_retry(
        || {
          let n = calls.fetch_add(1, Ordering::SeqCst);
          async move {
            if n < 2 {
              Err(RequestError::from_status(500, ""))
            } else {
              Ok(n)
            }
          }
        },
        Some(&config),
      )
      .await;

    assert_eq!(result, Ok(2));
    assert!(started.elapsed() >= Duration::from_millis(250));
  }

  #[tokio::test]
  async fn test_offline_skips_retries_without_calling() {
    let calls = AtomicU32::new(0);
    let executor = RetryExecutor::new(fast()).with_network(offline_tracker());

    let result: Result<(), _> = executor
      .with_retry(
        || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Err(RequestError::network("connection refused")) }
        },
        None,
      )
      .await;

    // Only the first attempt reaches the operation
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.unwrap_err(), RequestError::offline());
  }

  #[tokio::test]
  async fn test_create_retryable_passes_arguments() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let executor = RetryExecutor::new(fast());

    let double = executor.create_retryable(
      move |x: u32| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err(RequestError::timeout("timeout"))
          } else {
            Ok(x * 2)
          }
        }
      },
      None,
    );

    assert_eq!(double(21).await, Ok(42));
    assert_eq!(double(5).await, Ok(10));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_batch_settles_independently() {
    let executor = RetryExecutor::new(fast().with_max_retries(1));

    let ops: Vec<Box<dyn FnMut() -> BoxFuture<'static, Result<u32, RequestError>> + Send>> = vec![
      Box::new(|| async { Ok(1) }.boxed()),
      Box::new(|| async { Err(RequestError::from_status(502, "")) }.boxed()),
      Box::new(|| async { Ok(3) }.boxed()),
    ];

    let results = executor.batch_retry(ops, None).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Ok(1));
    assert_eq!(results[1].as_ref().unwrap_err().message, "HTTP 502");
    assert_eq!(results[2], Ok(3));
  }

  #[tokio::test]
  async fn test_offline_fallback_used_when_offline() {
    let executor = RetryExecutor::new(fast()).with_network(offline_tracker());

    let result = executor
      .with_offline_fallback(
        || async { Err(RequestError::network("network unreachable")) },
        || async { "cached" },
        None,
      )
      .await;

    assert_eq!(result, Ok("cached"));
  }

  #[tokio::test]
  async fn test_offline_fallback_propagates_when_online() {
    let executor = RetryExecutor::new(fast().with_max_retries(1));

    let result = executor
      .with_offline_fallback(
        || async { Err::<&str, _>(RequestError::from_status(500, "boom")) },
        || async { "cached" },
        None,
      )
      .await;

    assert_eq!(result.unwrap_err().message, "HTTP 500: boom");
  }
}
