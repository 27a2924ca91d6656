//! Capabilities the hosting runtime provides to the engine.

use async_trait::async_trait;
use color_eyre::Result;
use url::Url;

use crate::notify::Notification;

/// The runtime around the engine: its clients and the system notification tray.
#[async_trait]
pub trait ClientHost: Send + Sync {
  /// Display a system notification.
  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  /// Remove a displayed notification.
  async fn close_notification(&self, notification: &Notification) -> Result<()>;

  /// Navigate a client to `url`, reusing an existing client when possible.
  async fn open_window(&self, url: &Url) -> Result<()>;

  /// Take control of every open client right away.
  async fn claim_clients(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use std::sync::Mutex;

  /// Records every call for later assertions.
  #[derive(Debug, Clone, PartialEq, Eq)]
  pub enum HostCall {
    Show(String),
    Close(String),
    Open(String),
    Claim,
  }

  #[derive(Default)]
  pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
  }

  impl RecordingHost {
    pub fn calls(&self) -> Vec<HostCall> {
      self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) {
      self.calls.lock().unwrap().push(call);
    }
  }

  #[async_trait]
  impl ClientHost for RecordingHost {
    async fn show_notification(&self, notification: &Notification) -> Result<()> {
      self.record(HostCall::Show(notification.title.clone()));
      Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<()> {
      self.record(HostCall::Close(notification.title.clone()));
      Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
      self.record(HostCall::Open(url.to_string()));
      Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
      self.record(HostCall::Claim);
      Ok(())
    }
  }
}
