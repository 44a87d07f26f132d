use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetrySettings,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the configuration API (e.g. "https://statsigapi.net/console/v1")
  pub url: Option<String>,
  /// Header carrying the API key
  pub key_header: String,
  /// Per-request timeout
  pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: None,
      key_header: "STATSIG-API-KEY".to_string(),
      request_timeout_ms: 5_000,
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Entry count above which eviction halves the cache
  pub max_size: usize,
  /// Chance that a write runs the eviction pass (0.0 - 1.0)
  pub eviction_probability: f64,
  pub default_ttl_secs: i64,
  pub long_ttl_secs: i64,
  pub short_ttl_secs: i64,
  /// GET paths containing any of these get the long TTL
  pub slow_changing_paths: Vec<String>,
  /// Save the cache to disk on exit and restore it on start
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_size: 100,
      eviction_probability: 0.1,
      default_ttl_secs: 300,
      long_ttl_secs: 3_600,
      short_ttl_secs: 30,
      slow_changing_paths: vec![
        "/gates".to_string(),
        "/experiments".to_string(),
        "/dynamic-configs".to_string(),
      ],
      persist: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_retries: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub backoff_multiplier: f64,
  /// Delay between starts of queued operations during a drain
  pub queue_stagger_ms: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay_ms: 1_000,
      max_delay_ms: 30_000,
      backoff_multiplier: 2.0,
      queue_stagger_ms: 100,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub probe_interval_ms: u64,
  pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      probe_interval_ms: 5_000,
      probe_timeout_ms: 2_000,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cfgshield.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cfgshield/config.yaml
  ///
  /// Without an explicit path, a missing file yields the defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cfgshield.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cfgshield").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    for (name, value) in [
      ("api.request_timeout_ms", self.api.request_timeout_ms),
      ("network.probe_interval_ms", self.network.probe_interval_ms),
      ("network.probe_timeout_ms", self.network.probe_timeout_ms),
    ] {
      if value == 0 {
        return Err(eyre!("{} must be greater than 0", name));
      }
    }
    if self.retry.backoff_multiplier <= 1.0 {
      return Err(eyre!(
        "retry.backoff_multiplier must be greater than 1, got {}",
        self.retry.backoff_multiplier
      ));
    }
    if !(0.0..=1.0).contains(&self.cache.eviction_probability) {
      return Err(eyre!(
        "cache.eviction_probability must be within 0..=1, got {}",
        self.cache.eviction_probability
      ));
    }
    Ok(())
  }

  /// Resolve the API base URL, preferring an explicit override.
  pub fn api_url(&self, override_url: Option<&str>) -> Result<String> {
    override_url
      .map(String::from)
      .or_else(|| self.api.url.clone())
      .ok_or_else(|| eyre!("No API URL configured. Set api.url in the config file or pass --url."))
  }

  /// Get the API key from environment variables.
  ///
  /// Checks CFGSHIELD_API_KEY first, then STATSIG_CONSOLE_API_KEY as fallback.
  pub fn get_api_key() -> Option<String> {
    std::env::var("CFGSHIELD_API_KEY")
      .or_else(|_| std::env::var("STATSIG_CONSOLE_API_KEY"))
      .ok()
  }

  /// Directory for logs and the cache snapshot database.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cfgshield"))
  }
}
