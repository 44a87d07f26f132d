//! Online/offline state with reconnect-triggered queue draining.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::retry::{DrainReport, RetryQueue};

use super::ConnectivityNotifier;

/// Snapshot of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
  pub is_online: bool,
  /// When connectivity was last lost
  pub last_online_timestamp: Option<DateTime<Utc>>,
}

/// Tracks connectivity reported by a [`ConnectivityNotifier`].
///
/// Going offline records the time; coming back online drains every retry queue.
/// Cloning shares the same state.
#[derive(Clone)]
pub struct NetworkStatusTracker {
  inner: Arc<TrackerInner>,
}

struct TrackerInner {
  status: Mutex<NetworkStatus>,
  queue: RetryQueue,
  listener: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkStatusTracker {
  /// Create a tracker seeded from the notifier's current state and subscribe to it.
  ///
  /// Must be called within a tokio runtime.
  pub fn start(notifier: &dyn ConnectivityNotifier, queue: RetryQueue) -> Self {
    // Seed from the subscription itself so no change slips in between
    let mut rx = notifier.subscribe();
    let tracker = Self::detached(*rx.borrow_and_update(), queue);

    let weak: Weak<TrackerInner> = Arc::downgrade(&tracker.inner);
    let listener = tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(inner) = weak.upgrade() else {
          break;
        };
        NetworkStatusTracker { inner }.record_transition(online);
      }
    });

    *lock(&tracker.inner.listener) = Some(listener);
    tracker
  }

  /// Create a tracker that only changes through [`record_transition`](Self::record_transition).
  pub fn detached(online: bool, queue: RetryQueue) -> Self {
    Self {
      inner: Arc::new(TrackerInner {
        status: Mutex::new(NetworkStatus {
          is_online: online,
          last_online_timestamp: None,
        }),
        queue,
        listener: Mutex::new(None),
      }),
    }
  }

  pub fn is_online(&self) -> bool {
    lock(&self.inner.status).is_online
  }

  pub fn get_network_status(&self) -> NetworkStatus {
    *lock(&self.inner.status)
  }

  /// The queue drained on reconnect.
  pub fn queue(&self) -> &RetryQueue {
    &self.inner.queue
  }

  /// Apply a connectivity change.
  ///
  /// Returns the spawned drain when this call moved the tracker back online.
  pub fn record_transition(&self, online: bool) -> Option<JoinHandle<DrainReport>> {
    {
      let mut status = lock(&self.inner.status);
      if status.is_online == online {
        return None;
      }
      status.is_online = online;
      if !online {
        status.last_online_timestamp = Some(Utc::now());
      }
    }

    if online {
      info!("Network reconnected, draining retry queues");
      let queue = self.inner.queue.clone();
      Some(tokio::spawn(async move { queue.drain().await }))
    } else {
      warn!("Network went offline");
      None
    }
  }
}

impl Drop for TrackerInner {
  fn drop(&mut self) {
    if let Some(listener) = lock(&self.listener).take() {
      listener.abort();
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}
