use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the storefront is served from; manifest paths and endpoints resolve against it
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub endpoints: EndpointsConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Common prefix of every partition name
  pub prefix: String,
  /// Generation suffix; bumping it invalidates every partition on the next activation
  pub version: String,
  /// Paths pre-warmed into the static partition on install
  pub static_files: Vec<String>,
  /// Activate right after a successful install instead of waiting
  pub skip_waiting_on_install: bool,
  /// Database location (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "shoppwa".to_string(),
      version: "v1".to_string(),
      static_files: [
        "/",
        "/index.html",
        "/styles.css",
        "/app.js",
        "/manifest.json",
        "/icon-192x192.png",
        "/icon-512x512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      skip_waiting_on_install: true,
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 10 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
  pub orders: String,
  pub cart_sync: String,
  pub content_sync: String,
  /// Dynamic-partition entry overwritten by a content sync
  pub products: String,
}

impl Default for EndpointsConfig {
  fn default() -> Self {
    Self {
      orders: "/api/orders".to_string(),
      cart_sync: "/api/cart/sync".to_string(),
      content_sync: "/api/sync".to_string(),
      products: "/api/products".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Transient failures tolerated before an order is dead-lettered
  pub max_attempts: u32,
  /// Base interval of the replay scheduler
  pub interval_secs: u64,
  /// Interval of the periodic content refresh
  pub content_interval_secs: u64,
  /// Upper bound of the scheduler backoff
  pub max_backoff_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      interval_secs: 300,
      content_interval_secs: 3600,
      max_backoff_secs: 3600,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      title: "ShopPWA Notification".to_string(),
      body: "You have a new notification".to_string(),
      icon: "/icon-192x192.png".to_string(),
      badge: "/icon-192x192.png".to_string(),
      tag: "default".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive used when STOREFRONT_SW_LOG is unset
  pub level: String,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storefront-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storefront-sw/config.yaml
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
        "No configuration file found. Create one at ~/.config/storefront-sw/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("storefront-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storefront-sw").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Resolve a path (manifest entry or endpoint) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {} for origin {}: {}", path, self.origin, e))
  }

  /// Database path, falling back to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storefront-sw").join("worker.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("origin: https://shop.example\n").unwrap();
    assert_eq!(config.cache.prefix, "shoppwa");
    assert_eq!(config.cache.version, "v1");
    assert_eq!(config.cache.static_files.len(), 7);
    assert!(config.cache.skip_waiting_on_install);
    assert_eq!(config.endpoints.orders, "/api/orders");
    assert_eq!(config.sync.max_attempts, 5);
    assert_eq!(config.notifications.tag, "default");
  }

  #[test]
  fn test_partial_section_keeps_other_defaults() {
    let config = Config::parse(
      "origin: https://shop.example\ncache:\n  version: v7\nsync:\n  max_attempts: 2\n",
    )
    .unwrap();
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.cache.prefix, "shoppwa");
    assert_eq!(config.sync.max_attempts, 2);
    assert_eq!(config.sync.interval_secs, 300);
  }

  #[test]
  fn test_missing_origin_is_an_error() {
    assert!(Config::parse("cache:\n  version: v2\n").is_err());
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config::parse("origin: https://shop.example\n").unwrap();
    assert_eq!(
      config.resolve("/api/orders").unwrap().as_str(),
      "https://shop.example/api/orders"
    );
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
