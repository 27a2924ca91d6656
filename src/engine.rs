//! The engine owns every store and runs one handler per external event.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::build::BuildArtifacts;
use crate::cache::{CacheRuntime, GenerationStore, Served, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::error::EngineError;
use crate::host::ClientHost;
use crate::http::{Network, Request};
use crate::notify::{ClickOutcome, Notification, NotificationClick, NotificationDispatcher};
use crate::strategy::{Route, StrategyClassifier};
use crate::sync::{DrainReport, SyncQueue};

/// Where the engine is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Parsed,
  Installing,
  /// The current generation is fully precached
  Installed,
  Activating,
  /// The current generation is the only one and serves every request
  Activated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub generation: String,
  /// Generations deleted by this activation
  pub purged: Vec<String>,
}

/// Offline cache and background-sync engine.
///
/// Handlers take `&self`/`&mut self` and are meant to be driven one at a time
/// (see [`crate::event::spawn`]); that serialization is what keeps the shared
/// stores consistent.
pub struct Engine {
  artifacts: BuildArtifacts,
  db: Database,
  classifier: StrategyClassifier,
  runtime: CacheRuntime<SqliteStorage>,
  queue: SyncQueue,
  sync_tag: String,
  notifications: NotificationDispatcher,
  host: Arc<dyn ClientHost>,
  lifecycle: Lifecycle,
}

impl Engine {
  pub fn new(
    config: Config,
    artifacts: BuildArtifacts,
    db: Database,
    network: Arc<dyn Network>,
    host: Arc<dyn ClientHost>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let timeout = config.network.timeout_ms.map(Duration::from_millis);

    if !artifacts.manifest.contains(&config.assets.offline_page) {
      return Err(
        EngineError::Config(format!(
          "offline page {} is missing from the precache manifest",
          config.assets.offline_page
        ))
        .into(),
      );
    }

    let classifier = StrategyClassifier::from_config(&config)?;
    let runtime = CacheRuntime::new(
      SqliteStorage::new(db.clone()),
      Arc::clone(&network),
      origin.clone(),
      &config.assets.offline_page,
    )
    .with_timeout(timeout);
    let queue = SyncQueue::new(db.clone(), network, &config.sync.path_prefix).with_timeout(timeout);
    let notifications =
      NotificationDispatcher::new(config.notifications.clone(), origin, Arc::clone(&host));

    Ok(Self {
      artifacts,
      db,
      classifier,
      runtime,
      queue,
      sync_tag: config.sync.tag.clone(),
      notifications,
      host,
      lifecycle: Lifecycle::Parsed,
    })
  }

  /// Open the configured database and build an engine on it.
  pub fn open(
    config: Config,
    artifacts: BuildArtifacts,
    network: Arc<dyn Network>,
    host: Arc<dyn ClientHost>,
  ) -> Result<Self> {
    let path = config.storage.resolve_path()?;
    let db = Database::open(&path)?;
    Self::new(config, artifacts, db, network, host)
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// Name of the generation this engine installs and activates.
  pub fn generation(&self) -> &str {
    &self.artifacts.generation
  }

  pub fn storage(&self) -> &SqliteStorage {
    self.runtime.storage()
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.queue
  }

  /// Precache every manifest entry into this engine's generation.
  ///
  /// On failure nothing is stored and whatever generation was active before
  /// stays active.
  pub async fn install(&mut self) -> Result<InstallReport> {
    let previous = self.lifecycle;
    self.lifecycle = Lifecycle::Installing;
    let generation = self.artifacts.generation.clone();

    info!(%generation, entries = self.artifacts.manifest.len(), "installing");

    match self.runtime.precache(&generation, &self.artifacts.manifest).await {
      Ok(entries) => {
        self.lifecycle = Lifecycle::Installed;
        info!(%generation, entries, "installed");
        Ok(InstallReport {
          generation,
          entries,
        })
      }
      Err(e) => {
        self.lifecycle = previous;
        warn!(%generation, error = %e, "install failed");
        Err(e)
      }
    }
  }

  /// Make this engine's generation the only one and take over open clients.
  pub async fn activate(&mut self) -> Result<ActivateReport> {
    let generation = self.artifacts.generation.clone();
    if self.lifecycle != Lifecycle::Installed {
      return Err(EngineError::NotInstalled(generation).into());
    }

    self.lifecycle = Lifecycle::Activating;
    let purged = match self.runtime.storage().activate(&generation) {
      Ok(purged) => purged,
      Err(e) => {
        self.lifecycle = Lifecycle::Installed;
        return Err(e);
      }
    };
    for name in &purged {
      info!(generation = %name, "deleted old cache generation");
    }

    if let Err(e) = self.host.claim_clients().await {
      warn!(error = %e, "failed to claim clients");
    }

    self.lifecycle = Lifecycle::Activated;
    info!(%generation, "activated");

    Ok(ActivateReport { generation, purged })
  }

  /// Serve an outgoing request. `None` means the request is not intercepted
  /// and goes to the network untouched.
  pub async fn fetch(&self, request: &Request) -> Option<Served> {
    let strategy = match self.classifier.classify(&request.url) {
      Route::PassThrough => {
        debug!(url = %request.url, "cross-origin request passed through");
        return None;
      }
      Route::Intercept(strategy) => strategy,
    };

    let served = self.runtime.handle(request, strategy).await;

    if served.network_error.is_some() && self.queue.accepts(request) {
      if let Err(e) = self.queue.enqueue(request) {
        warn!(url = %request.url, error = %e, "failed to queue request for sync");
      }
    }

    Some(served)
  }

  /// Connectivity-restored signal. Only the configured tag drains the queue.
  pub async fn sync(&self, tag: &str) -> Option<DrainReport> {
    if tag != self.sync_tag {
      debug!(tag, "ignoring unknown sync tag");
      return None;
    }

    match self.queue.drain().await {
      Ok(report) => Some(report),
      Err(e) => {
        warn!(error = %e, "sync drain aborted");
        None
      }
    }
  }

  pub async fn push(&self, payload: &[u8]) -> Option<Notification> {
    self.notifications.push(payload).await
  }

  pub async fn notification_click(&self, click: &NotificationClick) -> ClickOutcome {
    self.notifications.click(click).await
  }

  /// Flush persistent state.
  pub fn shutdown(self) -> Result<()> {
    info!("engine shutting down");
    self.db.close()
  }
}
