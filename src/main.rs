mod app;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cfgshield::config::Config;
use cfgshield::net::{ConnectivityNotifier, ManualConnectivity, ProbeConnectivity};
use clap::Parser;
use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cfgshield")]
#[command(about = "A resilient caching console for remote configuration APIs")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cfgshield/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding api.url from the config file
  #[arg(short, long)]
  url: Option<String>,

  /// Drive connectivity by hand with the `offline`/`online` commands instead of probing
  #[arg(long)]
  manual_network: bool,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,
}

fn init_logging(log_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cfgshield=info"));

  if log_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "cfgshield.log"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_stderr)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let api_url = config.api_url(args.url.as_deref())?;

  let manual = args.manual_network.then(|| Arc::new(ManualConnectivity::new(true)));
  let notifier: Arc<dyn ConnectivityNotifier> = match &manual {
    Some(manual) => manual.clone(),
    None => Arc::new(
      ProbeConnectivity::start(
        &api_url,
        Duration::from_millis(config.network.probe_interval_ms),
        Duration::from_millis(config.network.probe_timeout_ms),
      )
      .await?,
    ),
  };

  // Initialize and run the app
  let mut app = app::App::new(config, &api_url, notifier, manual)?;
  app.run().await?;

  Ok(())
}
