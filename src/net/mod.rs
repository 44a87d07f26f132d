//! Connectivity tracking.
//!
//! Platform connectivity is abstracted behind [`ConnectivityNotifier`], so the
//! tracker can run against a real reachability probe or a manually driven
//! source in tests.

mod probe;
mod tracker;

pub use probe::ProbeConnectivity;
pub use tracker::{NetworkStatus, NetworkStatusTracker};

use tokio::sync::watch;

/// Source of connectivity changes.
///
/// Subscribers receive the current state and every change after it.
/// Dropping the receiver unsubscribes.
pub trait ConnectivityNotifier: Send + Sync {
  /// Current connectivity as seen by the platform
  fn is_online(&self) -> bool;

  /// Subscribe to connectivity changes
  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity source driven by hand.
///
/// Used by tests and by the console's manual network mode.
pub struct ManualConnectivity {
  tx: watch::Sender<bool>,
}

impl ManualConnectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  /// Publish a new state. Repeating the current state is not a change.
  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
  }
}

impl ConnectivityNotifier for ManualConnectivity {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}
