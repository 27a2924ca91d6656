//! Maps a request URL to the caching strategy that serves it.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Origin, Url};

use crate::config::Config;

/// How cache and network are consulted for a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Static assets: cache, then network with write-through
  CacheFirst,
  /// Pages: network with write-through, then a possibly stale cached copy
  NetworkFirst,
  /// API calls: network only, never cached
  NetworkOnly,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Strategy::CacheFirst => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::NetworkOnly => "network-only",
    })
  }
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Foreign origin: the request is not intercepted
  PassThrough,
  Intercept(Strategy),
}

#[derive(Debug, Clone)]
pub struct StrategyClassifier {
  origin: Origin,
  static_prefix: String,
  api_prefix: String,
}

impl StrategyClassifier {
  pub fn new(origin: &Url, static_prefix: &str, api_prefix: &str) -> Self {
    Self {
      origin: origin.origin(),
      static_prefix: static_prefix.to_string(),
      api_prefix: api_prefix.to_string(),
    }
  }

  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    Ok(Self::new(
      &config.origin_url()?,
      &config.assets.static_prefix,
      &config.routes.api_prefix,
    ))
  }

  /// Priority: foreign origin, static prefix, API prefix, everything else.
  pub fn classify(&self, url: &Url) -> Route {
    if url.origin() != self.origin {
      return Route::PassThrough;
    }

    let path = url.path();
    let strategy = if path.starts_with(&self.static_prefix) {
      Strategy::CacheFirst
    } else if path.starts_with(&self.api_prefix) {
      Strategy::NetworkOnly
    } else {
      Strategy::NetworkFirst
    };

    Route::Intercept(strategy)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> StrategyClassifier {
    StrategyClassifier::new(
      &Url::parse("https://beatflow.app").unwrap(),
      "/static/",
      "/api/",
    )
  }

  fn classify(url: &str) -> Route {
    classifier().classify(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    for url in [
      "https://beatflow.app/static/a.css",
      "https://beatflow.app/static/js/components.min.js?v=2",
      "https://beatflow.app/static/img/deep/nested/logo.svg",
    ] {
      assert_eq!(classify(url), Route::Intercept(Strategy::CacheFirst), "{url}");
    }
  }

  #[test]
  fn test_api_is_network_only() {
    for url in [
      "https://beatflow.app/api/beats",
      "https://beatflow.app/api/beats/upload",
      "https://beatflow.app/api/users/1/follow",
    ] {
      assert_eq!(classify(url), Route::Intercept(Strategy::NetworkOnly), "{url}");
    }
  }

  #[test]
  fn test_everything_else_is_network_first() {
    for url in [
      "https://beatflow.app/",
      "https://beatflow.app/profile/dj",
      "https://beatflow.app/offline.html",
      "https://beatflow.app/staticfile",
      "https://beatflow.app/apis",
    ] {
      assert_eq!(classify(url), Route::Intercept(Strategy::NetworkFirst), "{url}");
    }
  }

  #[test]
  fn test_cross_origin_passes_through() {
    for url in [
      "https://fonts.googleapis.com/static/a.css",
      "http://beatflow.app/static/a.css",
      "https://beatflow.app:8443/api/beats",
      "https://cdn.beatflow.app/",
    ] {
      assert_eq!(classify(url), Route::PassThrough, "{url}");
    }
  }

  #[test]
  fn test_classification_is_stable() {
    let c = classifier();
    let url = Url::parse("https://beatflow.app/static/a.css").unwrap();
    assert_eq!(c.classify(&url), c.classify(&url));
  }

  #[test]
  fn test_strategy_names() {
    assert_eq!(Strategy::CacheFirst.to_string(), "cache-first");
    assert_eq!(
      serde_json::to_string(&Strategy::NetworkOnly).unwrap(),
      "\"network-only\""
    );
  }
}
