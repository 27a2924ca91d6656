//! Cache runtime that executes a caching strategy for one request.

use color_eyre::Result;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::storage::GenerationStore;
use super::traits::{Served, ServedFrom};
use crate::build::PrecacheManifest;
use crate::error::{EngineError, FetchError};
use crate::http::{fetch_with_timeout, Network, Request, RequestKey, Response};
use crate::strategy::Strategy;

/// Cache runtime that sits between clients and the network.
///
/// Every request ends in one of the [`ServedFrom`] states; storage and
/// network failures are absorbed here and only logged.
pub struct CacheRuntime<S: GenerationStore> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  origin: Url,
  offline_page: String,
  timeout: Option<Duration>,
}

impl<S: GenerationStore> CacheRuntime<S> {
  /// Create a new runtime with the given storage backend and network.
  pub fn new(storage: S, network: Arc<dyn Network>, origin: Url, offline_page: &str) -> Self {
    Self {
      storage: Arc::new(storage),
      network,
      origin,
      offline_page: offline_page.to_string(),
      timeout: None,
    }
  }

  /// Bound every network fetch.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Fetch every manifest entry and store them as generation `name`.
  ///
  /// All entries are fetched before anything is written, and the write is a
  /// single transaction, so a failed precache leaves no trace.
  pub async fn precache(&self, name: &str, manifest: &PrecacheManifest) -> Result<usize> {
    let fetches = manifest.entries().iter().map(|path| async move {
      let url = self.origin.join(path).map_err(|e| EngineError::Install {
        generation: name.to_string(),
        url: path.clone(),
        reason: e.to_string(),
      })?;
      let request = Request::get(url);

      let response = self.fetch(&request).await.map_err(|e| EngineError::Install {
        generation: name.to_string(),
        url: path.clone(),
        reason: e.to_string(),
      })?;

      if !response.is_success() {
        return Err(EngineError::Install {
          generation: name.to_string(),
          url: path.clone(),
          reason: format!("status {}", response.status),
        });
      }

      Ok((request.cache_key(), response))
    });

    let entries = try_join_all(fetches).await?;

    self
      .storage
      .install_generation(name, &entries)
      .map_err(|e| EngineError::Install {
        generation: name.to_string(),
        url: "*".to_string(),
        reason: e.to_string(),
      })?;

    Ok(entries.len())
  }

  /// Serve a request with the given strategy.
  pub async fn handle(&self, request: &Request, strategy: Strategy) -> Served {
    let served = match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::NetworkOnly => self.network_only(request).await,
    };

    debug!(
      method = %request.method,
      url = %request.url,
      %strategy,
      source = ?served.source,
      status = served.response.status,
      "served request"
    );

    served
  }

  /// 1. Cache hit: return it, no network
  /// 2. Miss: fetch and write through
  /// 3. Network failure: offline handling
  async fn cache_first(&self, request: &Request) -> Served {
    let strategy = Strategy::CacheFirst;

    if let Some(cached) = self.lookup(request) {
      return Served::from_cache(cached, strategy);
    }

    match self.fetch(request).await {
      Ok(response) => {
        self.write_through(request, &response);
        Served::from_network(response, strategy)
      }
      Err(e) => self.offline(request, strategy, e),
    }
  }

  /// 1. Fetch and write through
  /// 2. Network failure: cached copy, possibly stale
  /// 3. Nothing cached: offline handling
  async fn network_first(&self, request: &Request) -> Served {
    let strategy = Strategy::NetworkFirst;

    match self.fetch(request).await {
      Ok(response) => {
        self.write_through(request, &response);
        Served::from_network(response, strategy)
      }
      Err(e) => match self.lookup(request) {
        Some(cached) => Served::from_cache(cached, strategy).after_network_error(Some(e)),
        None => self.offline(request, strategy, e),
      },
    }
  }

  /// Network only; the cache is neither read nor written.
  async fn network_only(&self, request: &Request) -> Served {
    let strategy = Strategy::NetworkOnly;

    match self.fetch(request).await {
      Ok(response) => Served::from_network(response, strategy),
      Err(e) => self.offline(request, strategy, e),
    }
  }

  /// Navigations get the stored offline page, everything else a 503.
  fn offline(&self, request: &Request, strategy: Strategy, error: FetchError) -> Served {
    if request.accepts_html() {
      if let Some(page) = self.offline_page() {
        return Served {
          response: page,
          source: ServedFrom::OfflineFallback,
          strategy,
          network_error: Some(error),
        };
      }
      warn!("offline page missing from the active generation");
    }

    Served {
      response: Response::service_unavailable(),
      source: ServedFrom::Failed,
      strategy,
      network_error: Some(error),
    }
  }

  fn offline_page(&self) -> Option<Response> {
    let url = self.origin.join(&self.offline_page).ok()?;
    self.lookup_key(&RequestKey::new("GET", &url))
  }

  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let result = fetch_with_timeout(self.network.as_ref(), request, self.timeout).await;
    if let Err(e) = &result {
      debug!(url = %request.url, error = %e, "network fetch failed");
    }
    result
  }

  fn lookup(&self, request: &Request) -> Option<Response> {
    if !request.is_get() {
      return None;
    }
    self.lookup_key(&request.cache_key())
  }

  fn lookup_key(&self, key: &RequestKey) -> Option<Response> {
    let generation = self.active_generation()?;

    match self.storage.lookup(&generation, key) {
      Ok(found) => found.map(|cached| cached.response),
      Err(e) => {
        warn!(url = %key.url, error = %e, "cache lookup failed, treating as miss");
        None
      }
    }
  }

  /// Only successful GET responses are kept.
  fn write_through(&self, request: &Request, response: &Response) {
    if !request.is_get() || !response.is_success() {
      return;
    }

    let Some(generation) = self.active_generation() else {
      return;
    };

    if let Err(e) = self.storage.store(&generation, &request.cache_key(), response) {
      warn!(url = %request.url, error = %e, "write-through failed");
    }
  }

  fn active_generation(&self) -> Option<String> {
    match self.storage.active_generation() {
      Ok(generation) => generation,
      Err(e) => {
        warn!(error = %e, "could not read active generation");
        None
      }
    }
  }
}

impl<S: GenerationStore> Clone for CacheRuntime<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      origin: self.origin.clone(),
      offline_page: self.offline_page.clone(),
      timeout: self.timeout,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::http::testing::FakeNetwork;

  const ORIGIN: &str = "http://localhost:8000";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn runtime(network: Arc<FakeNetwork>) -> CacheRuntime<SqliteStorage> {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    CacheRuntime::new(storage, network, Url::parse(ORIGIN).unwrap(), "/offline.html")
  }

  fn manifest() -> PrecacheManifest {
    PrecacheManifest::from_paths(["/", "/offline.html", "/static/a.css"])
  }

  fn routed_network() -> Arc<FakeNetwork> {
    let network = Arc::new(FakeNetwork::online());
    network.route(url("/").as_str(), Response::new(200, "home"));
    network.route(url("/offline.html").as_str(), Response::new(200, "offline"));
    network.route(url("/static/a.css").as_str(), Response::new(200, "a"));
    network
  }

  async fn installed(network: Arc<FakeNetwork>) -> CacheRuntime<SqliteStorage> {
    let runtime = runtime(network);
    runtime.precache("app-1", &manifest()).await.unwrap();
    runtime.storage().activate("app-1").unwrap();
    runtime
  }

  fn html(path: &str) -> Request {
    Request::get(url(path)).with_header("accept", "text/html")
  }

  #[tokio::test]
  async fn test_precache_stores_every_entry() {
    let network = routed_network();
    let runtime = runtime(network);
    assert_eq!(runtime.precache("app-1", &manifest()).await.unwrap(), 3);
    assert_eq!(runtime.storage().entry_count("app-1").unwrap(), 3);
  }

  #[tokio::test]
  async fn test_precache_failure_writes_nothing() {
    let network = routed_network();
    let runtime = runtime(network.clone());
    let broken = PrecacheManifest::from_paths(["/", "/static/missing.css"]);

    let err = runtime.precache("app-1", &broken).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<EngineError>(),
      Some(EngineError::Install { .. })
    ));
    assert!(runtime.storage().generations().unwrap().is_empty());

    network.set_online(false);
    assert!(runtime.precache("app-1", &manifest()).await.is_err());
    assert!(runtime.storage().generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    let before = network.request_count();

    let served = runtime
      .handle(&Request::get(url("/static/a.css")), Strategy::CacheFirst)
      .await;
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, b"a");
    assert_eq!(network.request_count(), before);
  }

  #[tokio::test]
  async fn test_cache_first_miss_writes_through() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    network.route(url("/static/b.js").as_str(), Response::new(200, "b"));

    let request = Request::get(url("/static/b.js"));
    let served = runtime.handle(&request, Strategy::CacheFirst).await;
    assert_eq!(served.source, ServedFrom::Network);

    network.set_online(false);
    let served = runtime.handle(&request, Strategy::CacheFirst).await;
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, b"b");
  }

  #[tokio::test]
  async fn test_error_status_not_written_through() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;

    let request = Request::get(url("/static/gone.css"));
    let served = runtime.handle(&request, Strategy::CacheFirst).await;
    assert_eq!(served.response.status, 404);
    assert_eq!(served.source, ServedFrom::Network);
    assert!(runtime
      .storage()
      .lookup("app-1", &request.cache_key())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_then_stale_copy() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    network.route(url("/").as_str(), Response::new(200, "home v2"));

    let served = runtime.handle(&html("/"), Strategy::NetworkFirst).await;
    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(served.response.body, b"home v2");

    network.set_online(false);
    let served = runtime.handle(&html("/"), Strategy::NetworkFirst).await;
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, b"home v2");
    assert!(served.network_error.is_some());
  }

  #[tokio::test]
  async fn test_timed_out_fetch_falls_back_to_cache() {
    let network = routed_network();
    let runtime = installed(network.clone())
      .await
      .with_timeout(Some(Duration::from_millis(20)));
    network.set_latency(Some(Duration::from_secs(5)));

    let served = runtime.handle(&html("/"), Strategy::NetworkFirst).await;
    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.response.body, b"home");
    assert_eq!(served.network_error, Some(FetchError::Timeout(20)));

    let served = runtime
      .handle(&Request::get(url("/static/late.js")), Strategy::CacheFirst)
      .await;
    assert_eq!(served.source, ServedFrom::Failed);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_fallback_page() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    network.set_online(false);

    let served = runtime.handle(&html("/profile/dj"), Strategy::NetworkFirst).await;
    assert_eq!(served.source, ServedFrom::OfflineFallback);
    assert_eq!(served.response.body, b"offline");
  }

  #[tokio::test]
  async fn test_offline_non_navigation_is_unavailable() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    network.set_online(false);

    let served = runtime
      .handle(&Request::get(url("/static/unknown.png")), Strategy::CacheFirst)
      .await;
    assert_eq!(served.source, ServedFrom::Failed);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_network_only_never_touches_cache() {
    let network = routed_network();
    let runtime = installed(network.clone()).await;
    network.route(url("/api/feed").as_str(), Response::new(200, "[]"));

    let request = Request::get(url("/api/feed"));
    let served = runtime.handle(&request, Strategy::NetworkOnly).await;
    assert_eq!(served.source, ServedFrom::Network);
    assert!(runtime
      .storage()
      .lookup("app-1", &request.cache_key())
      .unwrap()
      .is_none());

    // A cached copy exists, yet an offline API call is never served stale
    runtime
      .storage()
      .store("app-1", &request.cache_key(), &Response::new(200, "stale"))
      .unwrap();
    network.set_online(false);
    let served = runtime.handle(&request, Strategy::NetworkOnly).await;
    assert_eq!(served.source, ServedFrom::Failed);
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_without_active_generation_nothing_is_cached() {
    let network = routed_network();
    let runtime = runtime(network.clone());

    let request = Request::get(url("/static/a.css"));
    let served = runtime.handle(&request, Strategy::CacheFirst).await;
    assert_eq!(served.source, ServedFrom::Network);

    network.set_online(false);
    let served = runtime.handle(&request, Strategy::CacheFirst).await;
    assert_eq!(served.source, ServedFrom::Failed);
  }
}
