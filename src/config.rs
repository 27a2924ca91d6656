use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::EngineError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub assets: AssetsConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Cache generations are named `<prefix>-<version>`
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// The application's own origin; requests to any other origin are not intercepted
  #[serde(default = "default_origin")]
  pub origin: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      origin: default_origin(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
  /// Root of the built static-asset tree
  #[serde(default = "default_static_dir")]
  pub static_dir: PathBuf,
  /// URL path prefix the asset tree is served under
  #[serde(default = "default_static_prefix")]
  pub static_prefix: String,
  /// Cacheable file extensions (case-insensitive, no leading dot)
  #[serde(default = "default_extensions", deserialize_with = "deserialize_lowercase_set")]
  pub extensions: BTreeSet<String>,
  /// Additional whitelisted extensions, e.g. audio samples
  #[serde(default, deserialize_with = "deserialize_lowercase_set")]
  pub extra_extensions: BTreeSet<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_web_manifest")]
  pub web_manifest: String,
  /// Combined stylesheet/script bundles, always precached
  #[serde(default = "default_bundles")]
  pub bundles: Vec<String>,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      static_dir: default_static_dir(),
      static_prefix: default_static_prefix(),
      extensions: default_extensions(),
      extra_extensions: BTreeSet::new(),
      offline_page: default_offline_page(),
      web_manifest: default_web_manifest(),
      bundles: default_bundles(),
    }
  }
}

impl AssetsConfig {
  /// Whether a file extension is in the cacheable set.
  pub fn is_cacheable_extension(&self, ext: &str) -> bool {
    let ext = ext.to_lowercase();
    self.extensions.contains(&ext) || self.extra_extensions.contains(&ext)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
  /// Upper bound for a single fetch. Unset means wait for the network to settle.
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Tag of the connectivity-restored signal that drains the queue
  #[serde(default = "default_sync_tag")]
  pub tag: String,
  /// Mutating requests under this path are queued when the network is unreachable
  #[serde(default = "default_sync_prefix")]
  pub path_prefix: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: default_sync_tag(),
      path_prefix: default_sync_prefix(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_badge")]
  pub badge: String,
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
  #[serde(default = "default_open_icon")]
  pub open_icon: String,
  #[serde(default = "default_close_icon")]
  pub close_icon: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      icon: default_icon(),
      badge: default_badge(),
      vibrate: default_vibrate(),
      open_icon: default_open_icon(),
      close_icon: default_close_icon(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file holding cache generations and the sync queue
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  /// Resolve the database path, falling back to the platform data directory.
  pub fn resolve_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR).join("offline.db"))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive; `RUST_LOG` takes precedence
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Write daily-rolling log files here in addition to stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      directory: None,
    }
  }
}

const APP_DIR: &str = "beatflow-offline";
const LOCAL_CONFIG: &str = "beatflow-offline.yaml";

fn default_prefix() -> String {
  "beatflow".to_string()
}

fn default_origin() -> String {
  "http://localhost:8000".to_string()
}

fn default_static_dir() -> PathBuf {
  PathBuf::from("static")
}

fn default_static_prefix() -> String {
  "/static/".to_string()
}

fn default_extensions() -> BTreeSet<String> {
  ["css", "js", "png", "jpg", "svg", "woff2"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_web_manifest() -> String {
  "/manifest.json".to_string()
}

fn default_bundles() -> Vec<String> {
  vec![
    "/static/css/components.min.css".to_string(),
    "/static/js/components.min.js".to_string(),
  ]
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_sync_tag() -> String {
  "sync-beats".to_string()
}

fn default_sync_prefix() -> String {
  "/api/beats".to_string()
}

fn default_icon() -> String {
  "/static/img/icon-192x192.png".to_string()
}

fn default_badge() -> String {
  "/static/img/badge.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

fn default_open_icon() -> String {
  "/static/img/open.png".to_string()
}

fn default_close_icon() -> String {
  "/static/img/close.png".to_string()
}

fn default_log_filter() -> String {
  "info".to_string()
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./beatflow-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/beatflow-offline/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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
      None => {
        tracing::debug!("no config file found, using defaults");
        Self::default()
      }
    };

    config.validate()?;
    Ok(config)
  }

  /// Parse and validate configuration from a YAML string.
  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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

  /// The application origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.app.origin).map_err(|e| {
      EngineError::Config(format!("origin {:?} is not a URL: {}", self.app.origin, e)).into()
    })
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;

    let static_prefix = &self.assets.static_prefix;
    let api_prefix = &self.routes.api_prefix;

    for prefix in [static_prefix, api_prefix, &self.sync.path_prefix] {
      if !prefix.starts_with('/') {
        return Err(EngineError::Config(format!("path prefix {:?} must start with '/'", prefix)).into());
      }
    }

    // Classification checks the static prefix before the API prefix; the two
    // namespaces may not nest.
    if static_prefix.starts_with(api_prefix.as_str()) || api_prefix.starts_with(static_prefix.as_str())
    {
      return Err(
        EngineError::Config(format!(
          "static prefix {:?} and API prefix {:?} overlap",
          static_prefix, api_prefix
        ))
        .into(),
      );
    }

    if self.app.prefix.is_empty() {
      return Err(EngineError::Config("app prefix is empty".to_string()).into());
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_validate() {
    let config = Config::from_yaml_str("{}").unwrap();
    assert_eq!(config.app.prefix, "beatflow");
    assert_eq!(config.assets.static_prefix, "/static/");
    assert_eq!(config.routes.api_prefix, "/api/");
    assert_eq!(config.sync.tag, "sync-beats");
    assert_eq!(config.assets.bundles.len(), 2);
    assert!(config.network.timeout_ms.is_none());
  }

  #[test]
  fn test_extensions_normalized() {
    let config = Config::from_yaml_str(
      r#"
assets:
  extensions: [".CSS", "Js"]
  extra_extensions: [wav]
"#,
    )
    .unwrap();
    assert!(config.assets.is_cacheable_extension("css"));
    assert!(config.assets.is_cacheable_extension("JS"));
    assert!(config.assets.is_cacheable_extension("wav"));
    assert!(!config.assets.is_cacheable_extension("png"));
  }

  #[test]
  fn test_overlapping_prefixes_rejected() {
    let err = Config::from_yaml_str(
      r#"
assets:
  static_prefix: /api/static/
routes:
  api_prefix: /api/
"#,
    )
    .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<EngineError>(),
      Some(EngineError::Config(_))
    ));
  }

  #[test]
  fn test_bad_origin_rejected() {
    let err = Config::from_yaml_str("app:\n  origin: not a url\n").unwrap_err();
    assert!(err.downcast_ref::<EngineError>().is_some());
  }

  #[test]
  fn test_explicit_path_missing() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "app:\n  prefix: app\nstorage:\n  path: /tmp/x.db\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.app.prefix, "app");
    assert_eq!(
      config.storage.resolve_path().unwrap(),
      PathBuf::from("/tmp/x.db")
    );
  }
}
