//! Reachability probe against the API host.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::ConnectivityNotifier;

/// Connectivity source that periodically opens a TCP connection to the API host.
///
/// The host counts as online while connections succeed within the timeout.
pub struct ProbeConnectivity {
  tx: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl ProbeConnectivity {
  /// Start probing the host of `api_url`.
  ///
  /// Runs one probe before returning so the initial state is real.
  pub async fn start(api_url: &str, interval: Duration, timeout: Duration) -> Result<Self> {
    if interval.is_zero() {
      return Err(eyre!("Probe interval must be greater than 0"));
    }
    let url = Url::parse(api_url).map_err(|e| eyre!("Invalid API URL {}: {}", api_url, e))?;
    let host = url
      .host_str()
      .ok_or_else(|| eyre!("API URL has no host: {}", api_url))?
      .to_string();
    let port = url
      .port_or_known_default()
      .ok_or_else(|| eyre!("API URL has no port: {}", api_url))?;
    let addr = format!("{}:{}", host, port);

    let initial = probe(&addr, timeout).await;
    let (tx, _rx) = watch::channel(initial);

    let probe_tx = tx.clone();
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // First tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let online = probe(&addr, timeout).await;
        debug!(addr = %addr, online, "connectivity probe");
        probe_tx.send_if_modified(|current| {
          if *current == online {
            false
          } else {
            *current = online;
            true
          }
        });
      }
    });

    Ok(Self { tx, task })
  }
}

async fn probe(addr: &str, timeout: Duration) -> bool {
  matches!(
    tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
    Ok(Ok(_))
  )
}

impl ConnectivityNotifier for ProbeConnectivity {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Drop for ProbeConnectivity {
  fn drop(&mut self) {
    self.task.abort();
  }
}
