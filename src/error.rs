//! Error taxonomy for the offline engine.
//!
//! Only build and install failures are allowed to abort an operation. Request,
//! sync and notification failures are absorbed by the handlers that see them
//! and only show up in the logs.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an engine operation.
///
/// These travel inside a `color_eyre::Report`; callers that need to branch on
/// the kind use `report.downcast_ref::<EngineError>()`.
#[derive(Debug, Error)]
pub enum EngineError {
  /// An asset could not be read while fingerprinting or listing the asset tree.
  #[error("build failed: cannot read {path}: {reason}")]
  Build { path: PathBuf, reason: String },

  /// A precache entry could not be fetched or stored. The generation being
  /// installed is discarded and the previous one stays active.
  #[error("install of {generation} failed at {url}: {reason}")]
  Install {
    generation: String,
    url: String,
    reason: String,
  },

  /// Activation was requested before the current generation finished installing.
  #[error("generation {0} is not installed")]
  NotInstalled(String),

  /// The configuration is unusable.
  #[error("invalid configuration: {0}")]
  Config(String),
}

/// Connectivity-class failure of a single fetch.
///
/// An HTTP error status is not a `FetchError`: the network answered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Connectivity(String),

  #[error("request timed out after {0} ms")]
  Timeout(u64),
}
