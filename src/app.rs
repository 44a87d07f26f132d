use std::io::Write;
use std::sync::Arc;

use cfgshield::api::ResilientClient;
use cfgshield::cache::{CacheResult, CacheSource, KeyValueStore, SqliteStore};
use cfgshield::commands::{self, Action, COMMANDS};
use cfgshield::config::Config;
use cfgshield::net::{ConnectivityNotifier, ManualConnectivity};
use cfgshield::RequestError;
use color_eyre::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Interactive console state
pub struct App {
  /// Request facade shared by all commands
  client: ResilientClient,

  /// Connectivity source; kept alive for the tracker's subscription
  _notifier: Arc<dyn ConnectivityNotifier>,

  /// Set in manual network mode
  manual: Option<Arc<ManualConnectivity>>,

  /// Snapshot store when cache persistence is enabled
  store: Option<SqliteStore>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(
    config: Config,
    api_url: &str,
    notifier: Arc<dyn ConnectivityNotifier>,
    manual: Option<Arc<ManualConnectivity>>,
  ) -> Result<Self> {
    let client = ResilientClient::from_config(&config, api_url, notifier.as_ref())?;

    let store = if config.cache.persist {
      Some(SqliteStore::open(&Config::data_dir()?.join("cache.db"))?)
    } else {
      None
    };

    Ok(Self {
      client,
      _notifier: notifier,
      manual,
      store,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    if let Some(store) = &self.store {
      match self.client.cache().store().restore_snapshot(store) {
        Ok(restored) => info!(restored, "Restored cache snapshot"),
        Err(e) => warn!(error = %e, "Failed to restore cache snapshot"),
      }
    }

    println!("cfgshield: type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while !self.should_quit {
      print!("cfgshield> ");
      std::io::stdout().flush()?;

      let Some(line) = lines.next_line().await? else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }

      match commands::parse(&line) {
        Ok(action) => self.handle(action).await,
        Err(message) => println!("{}", message),
      }
    }

    if let Some(store) = &self.store {
      self.save_snapshot(store);
    }
    Ok(())
  }

  fn save_snapshot(&self, store: &dyn KeyValueStore) {
    match self.client.cache().store().save_snapshot(store) {
      Ok(saved) => info!(saved, "Saved cache snapshot"),
      Err(e) => warn!(error = %e, "Failed to save cache snapshot"),
    }
  }

  async fn handle(&mut self, action: Action) {
    match action {
      Action::Get(path) => print_result(self.client.get(&path).await),
      Action::Volatile(path) => print_result(self.client.get_volatile(&path).await),
      Action::Write { method, path, body } => {
        print_result(self.client.send_or_queue(method, &path, body.as_ref()).await)
      }
      Action::Stats => print_json(&self.client.cache().stats()),
      Action::Invalidate(pattern) => {
        let removed = self.client.cache().invalidate(pattern.as_deref());
        println!("Removed {} entries", removed);
      }
      Action::Clear => {
        self.client.cache().clear();
        println!("Cache cleared");
      }
      Action::Queue => print_json(&self.client.queue().get_retry_queue_status()),
      Action::Drain => {
        let report = self.client.queue().drain().await;
        if report.is_empty() {
          println!("Nothing to replay");
        }
        for (queue, outcome) in report {
          println!(
            "{}: {} succeeded, {} failed",
            queue, outcome.succeeded, outcome.failed
          );
        }
      }
      Action::Status => print_json(&self.client.network().get_network_status()),
      Action::SetOnline(online) => match &self.manual {
        Some(manual) => {
          manual.set_online(online);
          println!("Network set {}", if online { "online" } else { "offline" });
        }
        None => println!("Connectivity is probed; start with --manual-network to override"),
      },
      Action::Help => {
        for cmd in COMMANDS {
          println!("  {:<22} {}", cmd.usage, cmd.description);
        }
      }
      Action::Quit => self.should_quit = true,
    }
  }
}

fn print_result(result: Result<CacheResult<Value>, RequestError>) {
  match result {
    Ok(result) => {
      let source = match result.source {
        CacheSource::Network => "network",
        CacheSource::Cache => "cache",
        CacheSource::Offline => "offline, queued for replay",
      };
      println!("[{}]", source);
      print_json(&result.data);
    }
    Err(e) => println!("Error ({:?}): {}", e.kind, e),
  }
}

fn print_json<T: serde::Serialize>(value: &T) {
  match serde_json::to_string_pretty(value) {
    Ok(text) => println!("{}", text),
    Err(e) => println!("Failed to render output: {}", e),
  }
}
