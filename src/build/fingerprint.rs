//! Content-addressed version of the static-asset tree.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::EngineError;

/// Number of hex characters kept from the digest.
pub const VERSION_LEN: usize = 8;

const CHUNK_SIZE: usize = 4096;

/// Fingerprint of every byte (and root-relative path) in the asset tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Name of the cache generation for this version, `<prefix>-<version>`.
  pub fn generation_name(&self, prefix: &str) -> String {
    format!("{}-{}", prefix, self.0)
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Hash the asset tree rooted at `root`.
///
/// Directories are walked depth-first with entries sorted by file name at
/// every level. For each file its relative path and then its bytes (in
/// fixed-size chunks) feed a single SHA-256 accumulator. Any unreadable entry
/// aborts with [`EngineError::Build`].
pub fn fingerprint(root: &Path) -> Result<Version, EngineError> {
  if !root.is_dir() {
    return Err(EngineError::Build {
      path: root.to_path_buf(),
      reason: "asset root is not a directory".to_string(),
    });
  }

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; CHUNK_SIZE];

  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.map_err(|e| EngineError::Build {
      path: e.path().unwrap_or(root).to_path_buf(),
      reason: e.to_string(),
    })?;

    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let relative = path.strip_prefix(root).unwrap_or(path);
    hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
    hasher.update([0u8]);

    let mut file = File::open(path).map_err(|e| build_error(path, e))?;
    loop {
      let read = file.read(&mut buffer).map_err(|e| build_error(path, e))?;
      if read == 0 {
        break;
      }
      hasher.update(&buffer[..read]);
    }
  }

  let digest = hex::encode(hasher.finalize());
  Ok(Version(digest[..VERSION_LEN].to_string()))
}

fn build_error(path: &Path, e: std::io::Error) -> EngineError {
  EngineError::Build {
    path: path.to_path_buf(),
    reason: e.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn asset_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css/a.css"), "body { color: red }").unwrap();
    fs::write(dir.path().join("b.js"), "console.log(1)").unwrap();
    dir
  }

  #[test]
  fn test_fingerprint_deterministic() {
    let dir = asset_tree();
    let v1 = fingerprint(dir.path()).unwrap();
    let v2 = fingerprint(dir.path()).unwrap();
    assert_eq!(v1, v2);
    assert_eq!(v1.as_str().len(), VERSION_LEN);
    assert!(v1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_single_byte_change_changes_version() {
    let dir = asset_tree();
    let before = fingerprint(dir.path()).unwrap();
    fs::write(dir.path().join("css/a.css"), "body { color: red}").unwrap();
    let after = fingerprint(dir.path()).unwrap();
    assert_ne!(before, after);
  }

  #[test]
  fn test_rename_changes_version() {
    let dir = asset_tree();
    let before = fingerprint(dir.path()).unwrap();
    fs::rename(dir.path().join("b.js"), dir.path().join("c.js")).unwrap();
    assert_ne!(before, fingerprint(dir.path()).unwrap());
  }

  #[test]
  fn test_identical_trees_share_version() {
    let a = asset_tree();
    let b = asset_tree();
    assert_eq!(fingerprint(a.path()).unwrap(), fingerprint(b.path()).unwrap());
  }

  #[test]
  fn test_empty_tree_has_version() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(fingerprint(dir.path()).unwrap().as_str().len(), VERSION_LEN);
  }

  #[test]
  fn test_missing_root_is_build_failure() {
    let dir = tempfile::tempdir().unwrap();
    let result = fingerprint(&dir.path().join("nope"));
    assert!(matches!(result, Err(EngineError::Build { .. })));
  }

  #[test]
  fn test_generation_name() {
    let dir = asset_tree();
    let version = fingerprint(dir.path()).unwrap();
    assert_eq!(
      version.generation_name("app"),
      format!("app-{}", version.as_str())
    );
  }
}
