//! Push notifications: render incoming payloads and route clicks back into
//! the application.
//!
//! Nothing is persisted. A payload that arrives while the engine is not
//! running is lost, and a malformed payload is dropped.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::config::NotificationsConfig;
use crate::host::ClientHost;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";

/// Payload delivered by the push transport.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: &'static str,
  pub title: &'static str,
  pub icon: String,
}

/// A rendered system notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Where `open` navigates to
  pub url: Url,
  pub actions: Vec<NotificationAction>,
}

/// A user interaction with a displayed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
  /// The action button pressed, `None` for a click on the body
  pub action: Option<String>,
  pub notification: Notification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Opened(Url),
  Dismissed,
}

pub struct NotificationDispatcher {
  config: NotificationsConfig,
  origin: Url,
  host: Arc<dyn ClientHost>,
}

impl NotificationDispatcher {
  pub fn new(config: NotificationsConfig, origin: Url, host: Arc<dyn ClientHost>) -> Self {
    Self {
      config,
      origin,
      host,
    }
  }

  /// Parse a push payload into a notification, or `None` if it is malformed.
  pub fn render(&self, payload: &[u8]) -> Option<Notification> {
    let payload: PushPayload = match serde_json::from_slice(payload) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "dropping malformed push payload");
        return None;
      }
    };

    let url = match self.origin.join(&payload.url) {
      Ok(url) => url,
      Err(e) => {
        warn!(url = %payload.url, error = %e, "dropping push payload with bad url");
        return None;
      }
    };

    Some(Notification {
      title: payload.title,
      body: payload.body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: self.config.vibrate.clone(),
      url,
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN,
          title: "Open",
          icon: self.config.open_icon.clone(),
        },
        NotificationAction {
          action: ACTION_CLOSE,
          title: "Close",
          icon: self.config.close_icon.clone(),
        },
      ],
    })
  }

  /// Render and display a push payload.
  pub async fn push(&self, payload: &[u8]) -> Option<Notification> {
    let notification = self.render(payload)?;

    if let Err(e) = self.host.show_notification(&notification).await {
      warn!(title = %notification.title, error = %e, "failed to show notification");
      return None;
    }

    debug!(title = %notification.title, "notification shown");
    Some(notification)
  }

  /// Dismiss the notification, then navigate on `open`.
  pub async fn click(&self, click: &NotificationClick) -> ClickOutcome {
    if let Err(e) = self.host.close_notification(&click.notification).await {
      warn!(error = %e, "failed to close notification");
    }

    if click.action.as_deref() != Some(ACTION_OPEN) {
      return ClickOutcome::Dismissed;
    }

    let url = click.notification.url.clone();
    if let Err(e) = self.host.open_window(&url).await {
      warn!(%url, error = %e, "failed to open client window");
      return ClickOutcome::Dismissed;
    }

    ClickOutcome::Opened(url)
  }
}
