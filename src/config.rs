use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toggl_cache::http::{Credentials, DEFAULT_BASE_URL};
use toggl_cache::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// Needed for clients, projects and tags
  pub workspace_id: Option<i64>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Retries on 5xx responses
  #[serde(default = "default_retries")]
  pub retries: u32,
  /// Surface every HTTP failure without retrying
  #[serde(default)]
  pub re_raise: bool,
  #[serde(default = "default_backoff_unit_ms")]
  pub backoff_unit_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      workspace_id: None,
      timeout_secs: default_timeout_secs(),
      retries: default_retries(),
      re_raise: false,
      backoff_unit_ms: default_backoff_unit_ms(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// One `cache_<kind>.json` file per entity type
  #[default]
  Json,
  /// A single `cache.sqlite` database
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: BackendKind,
  /// Cache directory (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  /// Entry lifetime in seconds; unset never expires, 0 disables caching
  pub expire_after_secs: Option<i64>,
  #[serde(default = "default_max_length")]
  pub max_length: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::default(),
      path: None,
      expire_after_secs: None,
      max_length: default_max_length(),
    }
  }
}

fn default_url() -> String {
  DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_retries() -> u32 {
  3
}

fn default_backoff_unit_ms() -> u64 {
  1000
}

fn default_max_length() -> usize {
  toggl_cache::cache::DEFAULT_MAX_LENGTH
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./toggl-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/toggl-cache/config.yaml
  ///
  /// Without any file the defaults apply. `TOGGL_WORKSPACE_ID` overrides
  /// the configured workspace.
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
      None => Config::default(),
    };
    config.apply_workspace_override(std::env::var("TOGGL_WORKSPACE_ID").ok())?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("toggl-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("toggl-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  fn apply_workspace_override(&mut self, value: Option<String>) -> Result<()> {
    if let Some(raw) = value {
      let id = raw
        .trim()
        .parse::<i64>()
        .map_err(|e| eyre!("TOGGL_WORKSPACE_ID is not a workspace id ({}): {}", raw, e))?;
      self.api.workspace_id = Some(id);
    }
    Ok(())
  }

  /// Get the Toggl API token from `TOGGL_API_TOKEN`.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TOGGL_API_TOKEN")
      .map_err(|_| eyre!("Toggl API token not found. Set the TOGGL_API_TOKEN environment variable."))
  }

  /// Password paired with the token; `api_token` selects token auth.
  pub fn get_password() -> String {
    std::env::var("TOGGL_PASSWORD").unwrap_or_else(|_| "api_token".to_string())
  }

  pub fn credentials() -> Result<Credentials> {
    Ok(Credentials::new(Self::get_api_token()?, Self::get_password()))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      retries: self.api.retries,
      re_raise: self.api.re_raise,
      backoff_unit: Duration::from_millis(self.api.backoff_unit_ms),
    }
  }

  pub fn expire_after(&self) -> Option<chrono::Duration> {
    self.cache.expire_after_secs.map(chrono::Duration::seconds)
  }

  /// Directory holding cache files and logs.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("toggl-cache"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_from_empty_document() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.url, DEFAULT_BASE_URL);
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.cache.backend, BackendKind::Json);
    assert_eq!(config.cache.max_length, 10_000);
    assert_eq!(config.expire_after(), None);
    assert_eq!(config.retry_policy(), RetryPolicy::default());
  }

  #[test]
  fn test_full_document() {
    let config = Config::parse(
      r#"
api:
  url: http://localhost:8080/api/v9/
  workspace_id: 42
  retries: 1
  re_raise: true
  backoff_unit_ms: 5
cache:
  backend: sqlite
  path: /tmp/toggl
  expire_after_secs: 3600
  max_length: 50
"#,
    )
    .unwrap();

    assert_eq!(config.api.workspace_id, Some(42));
    assert_eq!(config.cache.backend, BackendKind::Sqlite);
    assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/toggl"));
    assert_eq!(config.expire_after(), Some(chrono::Duration::hours(1)));

    let policy = config.retry_policy();
    assert_eq!(policy.retries, 1);
    assert!(policy.re_raise);
    assert_eq!(policy.backoff_unit, Duration::from_millis(5));
  }

  #[test]
  fn test_workspace_override() {
    let mut config = Config::default();
    config.apply_workspace_override(Some(" 77 ".into())).unwrap();
    assert_eq!(config.api.workspace_id, Some(77));

    config.apply_workspace_override(None).unwrap();
    assert_eq!(config.api.workspace_id, Some(77));

    assert!(config.apply_workspace_override(Some("abc".into())).is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/toggl.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_unknown_backend_rejected() {
    assert!(Config::parse("cache:\n  backend: redis\n").is_err());
  }
}
