use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::Served;
use crate::engine::{ActivateReport, Engine, InstallReport};
use crate::http::Request;
use crate::notify::{ClickOutcome, Notification, NotificationClick};
use crate::sync::DrainReport;

/// Events delivered to the engine by its host
#[derive(Debug)]
pub enum Event {
  /// Precache the current generation
  Install {
    reply: oneshot::Sender<Result<InstallReport>>,
  },
  /// Promote the installed generation and purge the others
  Activate {
    reply: oneshot::Sender<Result<ActivateReport>>,
  },
  /// Outgoing request from a client; `None` means not intercepted
  Fetch {
    request: Request,
    reply: oneshot::Sender<Option<Served>>,
  },
  /// Connectivity restored
  Sync {
    tag: String,
    reply: oneshot::Sender<Option<DrainReport>>,
  },
  /// Push message from the transport
  Push {
    payload: Vec<u8>,
    reply: oneshot::Sender<Option<Notification>>,
  },
  NotificationClick {
    click: NotificationClick,
    reply: oneshot::Sender<ClickOutcome>,
  },
  /// Flush state and stop the event loop
  Shutdown { reply: oneshot::Sender<Result<()>> },
}

/// Cloneable handle for sending events to a running engine
#[derive(Clone)]
pub struct EngineHandle {
  tx: mpsc::UnboundedSender<Event>,
}

/// Run the engine as a single task that handles one event at a time.
///
/// A handler always runs to completion, even if the caller stops waiting for
/// the reply, so write-through and queue updates are never cut short.
pub fn spawn(mut engine: Engine) -> (EngineHandle, JoinHandle<()>) {
  let (tx, mut rx) = mpsc::unbounded_channel();

  let task = tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      match event {
        Event::Install { reply } => {
          let _ = reply.send(engine.install().await);
        }
        Event::Activate { reply } => {
          let _ = reply.send(engine.activate().await);
        }
        Event::Fetch { request, reply } => {
          let _ = reply.send(engine.fetch(&request).await);
        }
        Event::Sync { tag, reply } => {
          let _ = reply.send(engine.sync(&tag).await);
        }
        Event::Push { payload, reply } => {
          let _ = reply.send(engine.push(&payload).await);
        }
        Event::NotificationClick { click, reply } => {
          let _ = reply.send(engine.notification_click(&click).await);
        }
        Event::Shutdown { reply } => {
          let _ = reply.send(engine.shutdown());
          return;
        }
      }
    }

    // Every handle dropped without an explicit shutdown
    debug!("event channel closed");
    if let Err(e) = engine.shutdown() {
      warn!(error = %e, "failed to flush engine state");
    }
  });

  (EngineHandle { tx }, task)
}

impl EngineHandle {
  pub async fn install(&self) -> Result<InstallReport> {
    self.request(|reply| Event::Install { reply }).await?
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    self.request(|reply| Event::Activate { reply }).await?
  }

  pub async fn fetch(&self, request: Request) -> Result<Option<Served>> {
    self.request(|reply| Event::Fetch { request, reply }).await
  }

  pub async fn sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    let tag = tag.to_string();
    self.request(|reply| Event::Sync { tag, reply }).await
  }

  pub async fn push(&self, payload: Vec<u8>) -> Result<Option<Notification>> {
    self.request(|reply| Event::Push { payload, reply }).await
  }

  pub async fn notification_click(&self, click: NotificationClick) -> Result<ClickOutcome> {
    self
      .request(|reply| Event::NotificationClick { click, reply })
      .await
  }

  pub async fn shutdown(&self) -> Result<()> {
    self.request(|reply| Event::Shutdown { reply }).await?
  }

  async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(event(reply))
      .map_err(|_| eyre!("engine is not running"))?;
    rx.await.map_err(|_| eyre!("engine stopped before replying"))
  }
}
