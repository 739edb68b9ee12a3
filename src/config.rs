use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the Docket API server.
  pub url: String,
}

/// Knobs for the cache, queue, and sync layers. Everything has a default so
/// a config file only naming the server still works offline-first.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Path prefix that marks a request as API traffic.
  pub api_prefix: String,
  /// POST endpoints whose writes are captured into the local queue when the
  /// network is unreachable.
  pub queued_endpoints: Vec<String>,
  /// Paths fetched and pinned into the static cache partition at install.
  pub static_assets: Vec<String>,
  /// Version stamp for cache entries; bumping it invalidates old entries on
  /// the next activate.
  pub cache_version: String,
  /// Upper bound on the dynamic partition; oldest entries evicted first.
  pub max_dynamic_entries: usize,
  /// Hours before a dynamic entry counts as a miss. `None` disables expiry.
  pub dynamic_ttl_hours: Option<u64>,
  /// Tag under which queued writes request a background replay pass.
  pub sync_tag: String,
  /// Path probed to detect connectivity changes.
  pub probe_path: String,
  /// Seconds between connectivity probes.
  pub probe_interval_secs: u64,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".into(),
      queued_endpoints: vec!["/api/diary-entries".into()],
      static_assets: vec!["/".into(), "/manifest.json".into()],
      cache_version: "v1".into(),
      max_dynamic_entries: 512,
      dynamic_ttl_hours: Some(24),
      sync_tag: "sync-diary-entries".into(),
      probe_path: "/".into(),
      probe_interval_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  /// Public application server key handed to the push platform on subscribe.
  pub server_key: String,
  /// Endpoint that stores subscription descriptors (server-side upsert).
  pub subscribe_path: String,
  /// Title used when a push payload does not carry one.
  pub title: String,
  pub icon: String,
  pub badge: String,
  /// Navigation target used when a push payload does not carry one.
  pub default_url: String,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      server_key: String::new(),
      subscribe_path: "/api/subscribe".into(),
      title: "Docket".into(),
      icon: "/icon-192.png".into(),
      badge: "/icon-192.png".into(),
      default_url: "/?tab=calendar".into(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./docket.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/docket/config.yaml
  /// 4. ~/.config/docket/config.yaml
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
        "No configuration file found. Create one at ~/.config/docket/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("docket.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("docket").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API bearer token from environment variables.
  ///
  /// Checks DOCKET_TOKEN first, then DOCKET_API_TOKEN as fallback.
  pub fn get_token() -> Result<String> {
    std::env::var("DOCKET_TOKEN")
      .or_else(|_| std::env::var("DOCKET_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set DOCKET_TOKEN or DOCKET_API_TOKEN environment variable.")
      })
  }

  /// Directory holding the cache and queue databases.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("docket"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_config_gets_offline_defaults() {
    let config: Config = serde_yaml::from_str("server:\n  url: https://docket.example\n").unwrap();
    assert_eq!(config.offline.api_prefix, "/api/");
    assert_eq!(config.offline.queued_endpoints, vec!["/api/diary-entries"]);
    assert_eq!(config.offline.sync_tag, "sync-diary-entries");
    assert_eq!(config.offline.dynamic_ttl_hours, Some(24));
    assert_eq!(config.push.subscribe_path, "/api/subscribe");
  }

  #[test]
  fn offline_knobs_are_overridable() {
    let yaml = r#"
server:
  url: https://docket.example
offline:
  queued_endpoints:
    - /api/diary-entries
    - /api/cases
  max_dynamic_entries: 16
  dynamic_ttl_hours: null
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.offline.queued_endpoints.len(), 2);
    assert_eq!(config.offline.max_dynamic_entries, 16);
    assert_eq!(config.offline.dynamic_ttl_hours, None);
    // Untouched knobs keep their defaults
    assert_eq!(config.offline.cache_version, "v1");
  }
}
