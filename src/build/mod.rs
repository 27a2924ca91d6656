//! Build-time half of the engine: fingerprint the asset tree and list what
//! has to be precached.
//!
//! The result is a [`BuildArtifacts`] file that the runtime loads at install
//! time, so the two halves can run in separate processes.

mod fingerprint;
mod manifest;

pub use fingerprint::{fingerprint, Version, VERSION_LEN};
pub use manifest::{build_manifest, PrecacheManifest};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Config;

/// Everything the runtime needs from the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifacts {
  pub version: Version,
  /// `<prefix>-<version>`
  pub generation: String,
  pub manifest: PrecacheManifest,
}

impl BuildArtifacts {
  /// Fingerprint the configured asset tree and collect its manifest.
  pub fn build(config: &Config) -> Result<Self> {
    let version = fingerprint(&config.assets.static_dir)?;
    let manifest = build_manifest(&config.assets)?;
    let generation = version.generation_name(&config.app.prefix);

    tracing::info!(
      %version,
      entries = manifest.len(),
      "built precache manifest for {}",
      generation
    );

    Ok(Self {
      version,
      generation,
      manifest,
    })
  }

  pub fn write_to(&self, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create directory {}: {}", parent.display(), e))?;
    }

    let json = serde_json::to_vec_pretty(self)
      .map_err(|e| eyre!("Failed to serialize build artifacts: {}", e))?;
    std::fs::write(path, json)
      .map_err(|e| eyre!("Failed to write build artifacts {}: {}", path.display(), e))?;

    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read(path)
      .map_err(|e| eyre!("Failed to read build artifacts {}: {}", path.display(), e))?;

    serde_json::from_slice(&contents)
      .map_err(|e| eyre!("Failed to parse build artifacts {}: {}", path.display(), e))
  }
}
