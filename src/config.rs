//! Configuration loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),
  #[error("failed to read config file {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    source: serde_yaml::Error,
  },
  #[error("invalid base URL '{url}': {source}")]
  InvalidUrl { url: String, source: url::ParseError },
  #[error("failed to construct HTTP client: {0}")]
  Http(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every request path is joined against.
  pub base_url: String,
  /// Cookie name the double-submit CSRF token is read from.
  #[serde(default = "default_csrf_cookie")]
  pub csrf_cookie: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  /// Remaining credential lifetime (seconds) below which a dispatch
  /// proactively refreshes before proceeding. Tune to the real token
  /// lifetime so the reactive 401 path stays rare.
  #[serde(default = "default_refresh_lookahead")]
  pub refresh_lookahead_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a cache entry with no subscribers survives before eviction.
  #[serde(default = "default_gc_grace")]
  pub gc_grace_secs: u64,
}

fn default_csrf_cookie() -> String {
  "csrf_token".to_string()
}

fn default_refresh_lookahead() -> i64 {
  180
}

fn default_gc_grace() -> u64 {
  60
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      refresh_lookahead_secs: default_refresh_lookahead(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      gc_grace_secs: default_gc_grace(),
    }
  }
}

impl ApiConfig {
  /// Parse and validate the configured base URL.
  pub fn base_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
      url: self.base_url.clone(),
      source,
    })
  }
}

impl Config {
  /// Minimal config for a given API base URL, everything else defaulted.
  pub fn for_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
        csrf_cookie: default_csrf_cookie(),
      },
      auth: AuthConfig::default(),
      cache: CacheConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./refetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/refetch/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(ConfigError::NotFound(
        "no configuration file found; create one at ~/.config/refetch/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("refetch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("refetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }
}
