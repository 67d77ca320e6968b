use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::api::Timeouts;

pub const API_URL_ENV: &str = "CLUBGATE_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

/// HTTP client implementation, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
  #[default]
  Standard,
  /// Negotiates gzip/deflate; falls back to standard if unavailable
  Compressed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub export_timeout_secs: u64,
  pub transport: TransportKind,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000/api".to_string(),
      timeout_secs: 15,
      export_timeout_secs: 30,
      transport: TransportKind::Standard,
    }
  }
}

impl ApiConfig {
  pub fn timeouts(&self) -> Timeouts {
    Timeouts {
      standard: Duration::from_secs(self.timeout_secs),
      export: Duration::from_secs(self.export_timeout_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Seconds between sweeps of expired entries; 0 disables the sweeper
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      sweep_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub max_recovery_attempts: u32,
  pub snapshot_max_age_secs: i64,
  /// SQLite file for the session and durable scopes
  pub database: Option<PathBuf>,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      max_recovery_attempts: crate::session::recovery::DEFAULT_MAX_ATTEMPTS,
      snapshot_max_age_secs: crate::session::snapshot::DEFAULT_MAX_AGE_SECS,
      database: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Directory for daily-rolling log files; stderr only when unset
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./clubgate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/clubgate/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("No configuration file found, using defaults");
        Config::default()
      }
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("clubgate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("clubgate").join("config.yaml");
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

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let url = url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", self.api.base_url, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("API base URL must be http or https: {}", url));
    }
    if self.api.timeout_secs == 0 || self.api.export_timeout_secs == 0 {
      return Err(eyre!("Request timeouts must be greater than zero"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api.base_url, "http://localhost:5000/api");
    assert_eq!(config.api.timeouts().standard, Duration::from_secs(15));
    assert_eq!(config.api.timeouts().export, Duration::from_secs(30));
    assert_eq!(config.session.max_recovery_attempts, 3);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      "api:\n  base_url: https://club.example.com/api\n  transport: compressed\ncache:\n  sweep_interval_secs: 0\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "https://club.example.com/api");
    assert_eq!(config.api.transport, TransportKind::Compressed);
    assert_eq!(config.api.timeout_secs, 15);
    assert_eq!(config.cache.sweep_interval_secs, 0);
    assert_eq!(config.session.snapshot_max_age_secs, 3600);
  }

  #[test]
  fn test_rejects_bad_url() {
    let mut config = Config::default();
    config.api.base_url = "ftp://club.example.com".into();
    assert!(config.validate().is_err());
    config.api.base_url = "not a url".into();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clubgate.yaml");
    std::fs::write(&path, "session:\n  max_recovery_attempts: 5\n").unwrap();
    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.session.max_recovery_attempts, 5);
  }
}
