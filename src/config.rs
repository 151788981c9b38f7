use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application server; relative manifest entries resolve against it
  pub origin: Url,
  pub cache: CacheConfig,
  /// URLs precached into the static partition at install
  pub manifest: Vec<String>,
  pub dynamic: DynamicRules,
  pub offline: OfflineAssets,
  pub endpoints: Endpoints,
  pub notification: NotificationDefaults,
  pub storage: StorageConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache: CacheConfig::default(),
      manifest: default_manifest(),
      dynamic: DynamicRules::default(),
      offline: OfflineAssets::default(),
      endpoints: Endpoints::default(),
      notification: NotificationDefaults::default(),
      storage: StorageConfig::default(),
    }
  }
}

fn default_origin() -> Url {
  Url::parse("http://localhost/").expect("default origin is a valid URL")
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/browse",
    "/about",
    "/public/css/app.css",
    "/public/js/app.js",
    "/public/images/hero.webp",
    "/manifest.json",
    "/offline.html",
    "/public/images/offline.png",
    "https://cdn.tailwindcss.com",
    "https://unpkg.com/feather-icons",
    "https://fonts.googleapis.com/icon?family=Material+Icons",
    "https://fonts.googleapis.com/css2?family=Material+Symbols+Outlined",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&family=Poppins:wght@300;400;500;600;700&display=swap",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Naming scheme prefix shared by every partition this agent owns
  pub prefix: String,
  /// Generation tag; bumping it invalidates the previous partitions on activation
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "time2eat".to_string(),
      version: "v1.0.0".to_string(),
    }
  }
}

/// Which URLs are cached opportunistically after a successful network fetch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynamicRules {
  /// Path prefixes (API routes, authenticated areas)
  pub prefixes: Vec<String>,
  /// Path segments that mark an image asset anywhere in the URL
  pub segments: Vec<String>,
  /// Catalog/menu API patterns matched anywhere in the URL
  pub patterns: Vec<String>,
}

impl Default for DynamicRules {
  fn default() -> Self {
    Self {
      prefixes: ["/api/", "/dashboard", "/customer/", "/vendor/", "/rider/", "/admin/"]
        .into_iter()
        .map(String::from)
        .collect(),
      segments: vec!["/public/images/".to_string()],
      patterns: vec!["/api/menu/".to_string(), "/api/restaurants/".to_string()],
    }
  }
}

impl DynamicRules {
  /// Whether a response for `url` should be copied into the dynamic partition.
  pub fn matches(&self, url: &Url) -> bool {
    let path = url.path();
    let full = url.as_str();

    self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
      || self.segments.iter().any(|s| full.contains(s.as_str()))
      || self.patterns.iter().any(|p| full.contains(p.as_str()))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineAssets {
  pub page: String,
  pub image: String,
}

impl Default for OfflineAssets {
  fn default() -> Self {
    Self {
      page: "/offline.html".to_string(),
      image: "/public/images/offline.png".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
  pub orders: String,
  pub cart_sync: String,
}

impl Default for Endpoints {
  fn default() -> Self {
    Self {
      orders: "/api/orders".to_string(),
      cart_sync: "/api/cart/sync".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Opened by the "view" action
  pub view_url: String,
  /// Opened when the notification body itself is clicked
  pub root_url: String,
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "Time2Eat".to_string(),
      body: "Your order status has been updated!".to_string(),
      icon: "/public/images/icon-192x192.png".to_string(),
      badge: "/public/images/badge-72x72.png".to_string(),
      vibrate: vec![200, 100, 200],
      view_url: "/dashboard".to_string(),
      root_url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database holding both the response cache and the offline queue
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  /// Configured database path, or `$XDG_DATA_HOME/time2eat-agent/agent.db`.
  pub fn resolve_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    Ok(data_dir()?.join("agent.db"))
  }
}

/// Per-user data directory for the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("time2eat-agent"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./time2eat-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/time2eat-agent/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists. Environment
  /// overrides are applied last.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("time2eat-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("time2eat-agent").join("config.yaml");
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

  /// Parse a YAML document; missing fields take their defaults.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Apply `T2E_ORIGIN` and `T2E_CACHE_VERSION` if set.
  fn with_env_overrides(mut self) -> Result<Self> {
    if let Ok(origin) = std::env::var("T2E_ORIGIN") {
      self.origin =
        Url::parse(&origin).map_err(|e| eyre!("Invalid T2E_ORIGIN '{}': {}", origin, e))?;
    }

    if let Ok(version) = std::env::var("T2E_CACHE_VERSION") {
      self.cache.version = version;
    }

    Ok(self)
  }

  /// Resolve a manifest entry, endpoint or asset path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }
}
