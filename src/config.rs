use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub encryption: EncryptionConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST API, e.g. "https://tasks.example.com/api"
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Store file (defaults to $XDG_DATA_HOME/taskmirror/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
  /// Collections stored in plaintext (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub plaintext_collections: BTreeSet<String>,
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Quiet period before a burst of change events triggers one refresh
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// How long a batch delete can be undone
  #[serde(default = "default_undo_window_secs")]
  pub undo_window_secs: u64,
}

fn default_debounce_ms() -> u64 {
  100
}

fn default_undo_window_secs() -> u64 {
  10
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
      undo_window_secs: default_undo_window_secs(),
    }
  }
}

impl SyncConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn undo_window(&self) -> Duration {
    Duration::from_secs(self.undo_window_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskmirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskmirror/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/taskmirror/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("taskmirror.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskmirror").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Bearer token from TASKMIRROR_API_TOKEN, if set.
  pub fn api_token() -> Option<String> {
    std::env::var("TASKMIRROR_API_TOKEN").ok()
  }

  /// Store passphrase from TASKMIRROR_PASSPHRASE, if set.
  pub fn passphrase() -> Option<String> {
    std::env::var("TASKMIRROR_PASSPHRASE").ok()
  }
}
