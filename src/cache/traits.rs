//! Core types describing how a request was served.

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::http::Response;
use crate::strategy::Strategy;

/// Terminal state of a single intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Replayed from the active generation, no network involved or network failed
  Cache,
  /// Fresh response from the network
  Network,
  /// Network unavailable, navigation answered with the stored offline page
  OfflineFallback,
  /// Network unavailable and nothing to serve; a synthetic 503 was returned
  Failed,
}

/// Result of running a strategy. The caller always receives a response.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
  pub strategy: Strategy,
  /// Connectivity error hit along the way, if any
  pub network_error: Option<FetchError>,
}

impl Served {
  pub fn from_network(response: Response, strategy: Strategy) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
      strategy,
      network_error: None,
    }
  }

  pub fn from_cache(response: Response, strategy: Strategy) -> Self {
    Self {
      response,
      source: ServedFrom::Cache,
      strategy,
      network_error: None,
    }
  }

  pub fn after_network_error(mut self, error: Option<FetchError>) -> Self {
    self.network_error = error;
    self
  }
}

/// A response stored in a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Lifecycle state of a stored generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Fully precached, waiting for activation
  Installed,
  /// Serving requests
  Active,
}

impl GenerationState {
  pub fn as_str(&self) -> &'static str {
    match self {
      GenerationState::Installed => "installed",
      GenerationState::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "installed" => Some(GenerationState::Installed),
      "active" => Some(GenerationState::Active),
      _ => None,
    }
  }
}

/// Summary of a stored generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
  pub name: String,
  pub state: GenerationState,
  pub entries: usize,
}
