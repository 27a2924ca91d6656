//! Precache manifest: every URL path that must be cached before the engine
//! can serve offline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use url::Url;
use walkdir::WalkDir;

use crate::config::AssetsConfig;
use crate::error::EngineError;

/// Sorted, de-duplicated list of absolute URL paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecacheManifest(Vec<String>);

impl PrecacheManifest {
  pub fn from_paths<I, S>(paths: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let set: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
    Self(set.into_iter().collect())
  }

  pub fn entries(&self) -> &[String] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn contains(&self, path: &str) -> bool {
    self.0.binary_search_by(|p| p.as_str().cmp(path)).is_ok()
  }
}

/// Collect the manifest for the configured asset tree.
///
/// The app shell (`/`, the offline page, the web-app manifest) and the
/// bundles are always present, so an empty asset tree still yields a
/// usable manifest.
pub fn build_manifest(assets: &AssetsConfig) -> Result<PrecacheManifest, EngineError> {
  let mut paths = vec![
    "/".to_string(),
    assets.offline_page.clone(),
    assets.web_manifest.clone(),
  ];
  paths.extend(assets.bundles.iter().cloned());
  paths.extend(asset_paths(assets)?);

  Ok(PrecacheManifest::from_paths(paths))
}

fn asset_paths(assets: &AssetsConfig) -> Result<Vec<String>, EngineError> {
  let root = assets.static_dir.as_path();
  if !root.is_dir() {
    return Err(EngineError::Build {
      path: root.to_path_buf(),
      reason: "asset root is not a directory".to_string(),
    });
  }

  let mut paths = Vec::new();

  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.map_err(|e| EngineError::Build {
      path: e.path().unwrap_or(root).to_path_buf(),
      reason: e.to_string(),
    })?;

    if !entry.file_type().is_file() || !is_cacheable(entry.path(), assets) {
      continue;
    }

    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    paths.push(url_path(&assets.static_prefix, relative)?);
  }

  Ok(paths)
}

/// Percent-encode each file name segment under the static prefix, so names
/// containing `#`, `?` or spaces stay part of the path.
fn url_path(prefix: &str, relative: &Path) -> Result<String, EngineError> {
  let build_error = |reason: &str| EngineError::Build {
    path: relative.to_path_buf(),
    reason: reason.to_string(),
  };

  let mut url = Url::parse("http://localhost/").map_err(|e| build_error(&e.to_string()))?;
  {
    let mut segments = url
      .path_segments_mut()
      .map_err(|_| build_error("cannot build url path"))?;
    segments.clear();
    segments.extend(prefix.split('/').filter(|s| !s.is_empty()));
    for component in relative.components() {
      segments.push(&component.as_os_str().to_string_lossy());
    }
  }

  Ok(url.path().to_string())
}

fn is_cacheable(path: &Path, assets: &AssetsConfig) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| assets.is_cacheable_extension(ext))
    .unwrap_or(false)
}
