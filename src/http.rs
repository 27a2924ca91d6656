//! Request and response values plus the network fetch primitive.
//!
//! The engine never talks to reqwest directly: every network round-trip goes
//! through [`Network`], so hosts can plug in their own transport and tests can
//! script connectivity.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::error::FetchError;

/// An outgoing request as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// Upper-case HTTP method
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Case-insensitive header lookup (first match).
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// POST, PUT, PATCH and DELETE change server state.
  pub fn is_mutating(&self) -> bool {
    matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
  }

  /// Whether the client is navigating to a document.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  /// Identity under which a response to this request is cached.
  pub fn cache_key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Method + URL identity of a cached response. Fragments are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }
}

/// A response produced by the network or replayed from a cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Synthetic answer for non-navigational requests that cannot be served offline.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(key, _)| key.eq_ignore_ascii_case(name))
    .map(|(_, value)| value.as_str())
}

/// The network primitive: a response, or a connectivity-class error.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Run a fetch with an optional upper bound on how long it may take.
pub async fn fetch_with_timeout(
  network: &dyn Network,
  request: &Request,
  timeout: Option<Duration>,
) -> Result<Response, FetchError> {
  match timeout {
    Some(limit) => match tokio::time::timeout(limit, network.fetch(request)).await {
      Ok(result) => result,
      Err(_) => Err(FetchError::Timeout(limit.as_millis() as u64)),
    },
    None => network.fetch(request).await,
  }
}

/// [`Network`] backed by a reqwest client with no caching of its own.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::Connectivity(format!("invalid method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder.send().await.map_err(connectivity_error)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(connectivity_error)?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

fn connectivity_error(e: reqwest::Error) -> FetchError {
  FetchError::Connectivity(e.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted network for exercising offline paths.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  /// Serves canned responses by URL and can be switched offline.
  #[derive(Default)]
  pub struct FakeNetwork {
    online: AtomicBool,
    latency: Mutex<Option<Duration>>,
    routes: Mutex<HashMap<String, Response>>,
    log: Mutex<Vec<(String, String)>>,
  }

  impl FakeNetwork {
    pub fn online() -> Self {
      let network = Self::default();
      network.set_online(true);
      network
    }

    pub fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }

    /// Delay every later fetch, e.g. to trip a fetch timeout.
    pub fn set_latency(&self, latency: Option<Duration>) {
      *self.latency.lock().unwrap() = latency;
    }

    pub fn route(&self, url: &str, response: Response) {
      self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// (method, url) of every request that reached the network.
    pub fn requests(&self) -> Vec<(String, String)> {
      self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
      self.log.lock().unwrap().len()
    }
  }

  #[async_trait]
  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
      self
        .log
        .lock()
        .unwrap()
        .push((request.method.clone(), request.url.to_string()));

      let latency = *self.latency.lock().unwrap();
      if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
      }

      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Connectivity("offline".to_string()));
      }

      Ok(
        self
          .routes
          .lock()
          .unwrap()
          .get(request.url.as_str())
          .cloned()
          .unwrap_or_else(|| Response::new(404, "not found")),
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_bytes, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  struct SlowNetwork;

  #[async_trait]
  impl Network for SlowNetwork {
    async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok(Response::new(200, "late"))
    }
  }

  #[test]
  fn test_request_classification_helpers() {
    let url = Url::parse("http://localhost/api/beats/upload").unwrap();
    let post = Request::new("post", url.clone()).with_header("Accept", "text/html,*/*");
    assert_eq!(post.method, "POST");
    assert!(post.is_mutating());
    assert!(!post.is_get());
    assert!(post.accepts_html());
    assert!(!Request::get(url).accepts_html());
  }

  #[test]
  fn test_cache_key_ignores_fragment() {
    let a = Request::get(Url::parse("http://localhost/static/a.css#x").unwrap());
    let b = Request::get(Url::parse("http://localhost/static/a.css").unwrap());
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_service_unavailable() {
    let response = Response::service_unavailable();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
  }

  #[tokio::test]
  async fn test_timeout_is_connectivity_class() {
    let request = Request::get(Url::parse("http://localhost/").unwrap());
    let result =
      fetch_with_timeout(&SlowNetwork, &request, Some(Duration::from_millis(10))).await;
    assert_eq!(result, Err(FetchError::Timeout(10)));
  }

  #[tokio::test]
  async fn test_http_network_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/beats/upload"))
      .and(header("x-beat", "1"))
      .and(body_bytes(b"beat".to_vec()))
      .respond_with(ResponseTemplate::new(201).set_body_string("created"))
      .expect(1)
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let url = Url::parse(&format!("{}/api/beats/upload", server.uri())).unwrap();
    let request = Request::new("POST", url)
      .with_header("x-beat", "1")
      .with_body("beat");

    let response = network.fetch(&request).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, b"created");
  }

  #[tokio::test]
  async fn test_http_error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let response = network.fetch(&Request::get(url)).await.unwrap();
    assert_eq!(response.status, 404);
  }

  #[tokio::test]
  async fn test_http_network_unreachable() {
    let network = HttpNetwork::new().unwrap();
    // Port 9 (discard) on loopback is closed in test environments
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let result = network.fetch(&Request::get(url)).await;
    assert!(matches!(result, Err(FetchError::Connectivity(_))));
  }
}
