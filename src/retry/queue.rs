//! Named queues of deferred operations, replayed on reconnect.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::RequestError;

type DeferredFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RequestError>> + Send>;

/// An operation waiting for the next drain.
pub struct QueuedOperation {
  pub queue_name: String,
  pub enqueued_at: DateTime<Utc>,
  operation: DeferredFn,
}

/// Outcome counts for one drained queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOutcome {
  pub succeeded: usize,
  pub failed: usize,
}

/// Per-queue outcomes of a drain pass.
pub type DrainReport = BTreeMap<String, QueueOutcome>;

#[derive(Default)]
struct NamedQueue {
  pending: Vec<QueuedOperation>,
  /// Taken by a drain that has not settled yet
  in_flight: usize,
}

type Queues = Arc<Mutex<HashMap<String, NamedQueue>>>;

/// Named queues of deferred operations.
///
/// Cloning shares the same queues.
#[derive(Clone)]
pub struct RetryQueue {
  queues: Queues,
  /// Delay between the starts of consecutive operations in one queue
  stagger: Duration,
}

impl Default for RetryQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl RetryQueue {
  pub fn new() -> Self {
    Self {
      queues: Arc::new(Mutex::new(HashMap::new())),
      stagger: Duration::from_millis(100),
    }
  }

  pub fn with_stagger(mut self, stagger: Duration) -> Self {
    self.stagger = stagger;
    self
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, NamedQueue>> {
    lock(&self.queues)
  }

  /// Append `op` to the named queue, creating it on first use.
  pub fn queue_for_retry<T, F, Fut>(&self, queue_name: &str, op: F)
  where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
  {
    let operation: DeferredFn = Box::new(move || op().map(|r| r.map(|_| ())).boxed());
    let queued = QueuedOperation {
      queue_name: queue_name.to_string(),
      enqueued_at: Utc::now(),
      operation,
    };

    let mut queues = self.lock();
    let queue = queues.entry(queue_name.to_string()).or_default();
    queue.pending.push(queued);
    debug!(queue = queue_name, pending = queue.pending.len(), "Queued operation for retry");
  }

  /// Drop all pending operations of the named queue.
  pub fn clear_retry_queue(&self, queue_name: &str) {
    self.lock().remove(queue_name);
  }

  /// Operation count per queue, including operations of a drain still running.
  pub fn get_retry_queue_status(&self) -> BTreeMap<String, usize> {
    self
      .lock()
      .iter()
      .map(|(name, queue)| (name.clone(), queue.pending.len() + queue.in_flight))
      .collect()
  }

  /// Run every pending operation once.
  ///
  /// Within a queue, operation `i` starts after `i * stagger`; all of them run
  /// concurrently and settle independently. Failures are logged and counted,
  /// never re-queued. Taken operations stay counted in the status until their
  /// queue settles; operations queued while a drain runs wait for the next one.
  pub async fn drain(&self) -> DrainReport {
    let taken: Vec<(String, Vec<QueuedOperation>)> = {
      let mut queues = self.lock();
      queues
        .iter_mut()
        .filter(|(_, queue)| !queue.pending.is_empty())
        .map(|(name, queue)| {
          let ops = std::mem::take(&mut queue.pending);
          queue.in_flight += ops.len();
          (name.clone(), ops)
        })
        .collect()
    };

    if taken.is_empty() {
      return DrainReport::new();
    }

    let stagger = self.stagger;
    let drains = taken.into_iter().map(|(name, ops)| {
      let settled = InFlight {
        queues: self.queues.clone(),
        name: name.clone(),
        count: ops.len(),
      };
      async move {
        let outcome = drain_queue(&name, ops, stagger).await;
        drop(settled);
        (name, outcome)
      }
    });

    let report: DrainReport = join_all(drains).await.into_iter().collect();
    for (name, outcome) in &report {
      info!(
        queue = %name,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        "Drained retry queue"
      );
    }
    report
  }
}

/// Releases a queue's in-flight count once its drain settles or is dropped.
struct InFlight {
  queues: Queues,
  name: String,
  count: usize,
}

impl Drop for InFlight {
  fn drop(&mut self) {
    if let Some(queue) = lock(&self.queues).get_mut(&self.name) {
      queue.in_flight = queue.in_flight.saturating_sub(self.count);
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn drain_queue(name: &str, ops: Vec<QueuedOperation>, stagger: Duration) -> QueueOutcome {
  let runs = ops.into_iter().enumerate().map(|(index, queued)| async move {
    let delay = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    let waited = Utc::now() - queued.enqueued_at;
    match (queued.operation)().await {
      Ok(()) => true,
      Err(err) => {
        warn!(
          queue = %queued.queue_name,
          index,
          queued_for_ms = waited.num_milliseconds(),
          error = %err,
          "Queued operation failed"
        );
        false
      }
    }
  });

  let results = join_all(runs).await;
  let succeeded = results.iter().filter(|ok| **ok).count();
  debug!(queue = name, succeeded, "Queue settled");
  QueueOutcome {
    succeeded,
    failed: results.len() - succeeded,
  }
}
