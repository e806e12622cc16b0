use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::backend::{RestBackend, BACKEND_PREFIX};
use crate::cache::{CacheLayer, NoopStorage, DEFAULT_TTL};
use crate::client::{RequestClient, RetryPolicy, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY};
use crate::ratelimit::RateLimitRule;
use crate::transport::HttpTransport;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Relative endpoints are resolved against this URL
  pub base_url: Option<String>,
  /// Hosted backend serving `backend://` endpoints
  pub backend: Option<BackendConfig>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default = "default_rate_limits")]
  pub rate_limits: Vec<RateLimitRule>,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: None,
      backend: None,
      cache: CacheConfig::default(),
      retry: RetryConfig::default(),
      rate_limits: default_rate_limits(),
      http: HttpConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Turn off to send every request to the network
  pub enabled: bool,
  pub ttl_secs: u64,
  /// Share one dispatch between concurrent identical requests
  pub dedupe_in_flight: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: DEFAULT_TTL.as_secs(),
      dedupe_in_flight: false,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub count: u32,
  pub delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      count: DEFAULT_RETRY_COUNT,
      delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.count, Duration::from_millis(self.delay_ms))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset
  pub level: String,
  /// Log directory (defaults to $XDG_DATA_HOME/parla/logs)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

/// The backend is limited out of the box; plain endpoints are not.
fn default_rate_limits() -> Vec<RateLimitRule> {
  vec![RateLimitRule::new(
    BACKEND_PREFIX,
    60,
    Duration::from_secs(60),
  )]
}

impl Config {
  /// Load configuration.
  ///
  /// An explicit path must exist. Otherwise the first existing file among
  /// [`Config::search_paths`] is used, and without one the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit_path {
      if !path.is_file() {
        return Err(eyre!("Config file not found: {}", path.display()));
      }
      return Self::read(path);
    }

    match Self::search_paths().into_iter().find(|path| path.is_file()) {
      Some(path) => Self::read(&path),
      None => Ok(Self::default()),
    }
  }

  /// `./parla.yaml`, then `$XDG_CONFIG_HOME/parla/config.yaml`.
  pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("parla.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("parla").join("config.yaml")));
    paths
  }

  fn read(path: &Path) -> Result<Self> {
    std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))
      .and_then(|contents| Self::from_yaml(&contents))
      .wrap_err_with(|| format!("Invalid config file {}", path.display()))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks PARLA_BACKEND_KEY.
  pub fn get_backend_key() -> Result<String> {
    std::env::var("PARLA_BACKEND_KEY").map_err(|_| {
      eyre!("Backend API key not found. Set PARLA_BACKEND_KEY environment variable.")
    })
  }

  /// Get the user's session token, if one was provided.
  pub fn get_access_token() -> Option<String> {
    std::env::var("PARLA_ACCESS_TOKEN").ok()
  }

  /// Build a request client wired up from this configuration.
  pub fn build_client(&self) -> Result<RequestClient> {
    let timeout = Duration::from_secs(self.http.timeout_secs);

    let base_url = self
      .base_url
      .as_deref()
      .map(Url::parse)
      .transpose()
      .map_err(|e| eyre!("Invalid base_url: {}", e))?;
    let transport = HttpTransport::new(base_url, timeout)?;

    let cache = if self.cache.enabled {
      CacheLayer::in_memory()
    } else {
      CacheLayer::new(NoopStorage)
    };

    let mut builder = RequestClient::builder(transport)
      .cache(cache.with_ttl(self.cache.ttl()))
      .retry(self.retry.policy())
      .rate_limits(self.rate_limits.iter().cloned())
      .dedupe_in_flight(self.cache.dedupe_in_flight);

    if let Some(backend) = &self.backend {
      let url =
        Url::parse(&backend.url).map_err(|e| eyre!("Invalid backend url {}: {}", backend.url, e))?;
      let backend = RestBackend::new(
        url,
        Self::get_backend_key()?,
        Self::get_access_token(),
        timeout,
      )?;
      builder = builder.backend(backend);
    }

    Ok(builder.build())
  }
}
