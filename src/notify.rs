//! Notification dispatcher: push and sync-completion notifications, and
//! routing of clicks back into the app.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NotificationsConfig;
use crate::host::{Clients, NotificationHost};

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Fields a push message may carry; absent, null or non-string fields keep
/// their defaults.
#[derive(Debug, Default)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
}

impl PushPayload {
  fn parse(bytes: &[u8]) -> Self {
    let fields = match serde_json::from_slice::<Value>(bytes) {
      Ok(Value::Object(fields)) => fields,
      Ok(_) => {
        warn!("ignoring push payload that is not an object");
        return Self::default();
      }
      Err(e) => {
        warn!(error = %e, "ignoring malformed push payload");
        return Self::default();
      }
    };

    let text = |name: &str| match fields.get(name) {
      Some(Value::String(value)) => Some(value.clone()),
      None | Some(Value::Null) => None,
      Some(other) => {
        warn!(field = name, value = %other, "ignoring non-string push field");
        None
      }
    };
    Self {
      title: text("title"),
      body: text("body"),
      icon: text("icon"),
      badge: text("badge"),
      tag: text("tag"),
    }
  }
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open window of the app was focused
  Focused(String),
  /// No window was open, a new one was opened
  Opened(Url),
  /// Dismissed or unknown action; nothing beyond closing the notification
  Closed,
}

pub struct NotificationDispatcher {
  notifications: Arc<dyn NotificationHost>,
  clients: Arc<dyn Clients>,
  defaults: NotificationsConfig,
  origin: Url,
}

impl NotificationDispatcher {
  pub fn new(
    notifications: Arc<dyn NotificationHost>,
    clients: Arc<dyn Clients>,
    defaults: NotificationsConfig,
    origin: Url,
  ) -> Self {
    Self {
      notifications,
      clients,
      defaults,
      origin,
    }
  }

  /// Build the notification for a push message, merging the payload over the defaults.
  pub fn from_push(&self, payload: Option<&[u8]>) -> NotificationDescriptor {
    let payload = payload.map(PushPayload::parse).unwrap_or_default();

    let defaults = &self.defaults;
    NotificationDescriptor {
      title: payload.title.unwrap_or_else(|| defaults.title.clone()),
      body: payload.body.unwrap_or_else(|| defaults.body.clone()),
      icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
      tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
      require_interaction: true,
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
          icon: Some(defaults.icon.clone()),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
          icon: None,
        },
      ],
    }
  }

  /// Notification reporting that a queued order reached the server.
  pub fn order_synced(&self, order_id: &str) -> NotificationDescriptor {
    NotificationDescriptor {
      title: "Order Synced".to_string(),
      body: format!("Order #{} has been processed successfully", order_id),
      icon: self.defaults.icon.clone(),
      badge: self.defaults.badge.clone(),
      tag: "order-sync".to_string(),
      require_interaction: false,
      actions: Vec::new(),
    }
  }

  pub async fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    debug!(tag = %notification.tag, title = %notification.title, "showing notification");
    self.notifications.show(notification).await
  }

  /// Handle a click on the notification `tag`.
  ///
  /// `view` and the default action (no action) focus an open window of this
  /// app, opening one only when none exists.
  pub async fn on_click(&self, tag: &str, action: Option<&str>) -> Result<ClickOutcome> {
    info!(tag, action = action.unwrap_or(""), "notification clicked");
    self.notifications.close(tag).await?;

    match action {
      None | Some("") | Some(ACTION_VIEW) => {}
      Some(_) => return Ok(ClickOutcome::Closed),
    }

    let windows = self.clients.window_clients().await?;
    if let Some(window) = windows
      .iter()
      .find(|w| w.focusable && w.url.origin() == self.origin.origin())
    {
      self.clients.focus(&window.id).await?;
      return Ok(ClickOutcome::Focused(window.id.clone()));
    }

    let root = self.origin.join("/")?;
    self.clients.open_window(&root).await?;
    Ok(ClickOutcome::Opened(root))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{self, RecordingHost};

  fn dispatcher(host: &Arc<RecordingHost>) -> NotificationDispatcher {
    NotificationDispatcher::new(
      host.clone(),
      host.clone(),
      NotificationsConfig::default(),
      testing::url("/"),
    )
  }

  #[test]
  fn test_push_without_payload_uses_defaults() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).from_push(None);
    assert_eq!(n.title, "ShopPWA Notification");
    assert_eq!(n.body, "You have a new notification");
    assert_eq!(n.icon, "/icon-192x192.png");
    assert_eq!(n.tag, "default");
    assert!(n.require_interaction);
    let actions: Vec<_> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["view", "dismiss"]);
  }

  #[test]
  fn test_push_payload_overrides_key_by_key() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).from_push(Some(br#"{"title":"Sale","tag":"promo"}"#));
    assert_eq!(n.title, "Sale");
    assert_eq!(n.tag, "promo");
    assert_eq!(n.body, "You have a new notification");
  }

  #[test]
  fn test_malformed_push_payload_is_ignored() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).from_push(Some(b"not json"));
    assert_eq!(n.title, "ShopPWA Notification");
  }

  #[test]
  fn test_push_field_of_wrong_type_keeps_only_its_default() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).from_push(Some(br#"{"title":5,"body":"Sale","tag":null}"#));
    assert_eq!(n.title, "ShopPWA Notification");
    assert_eq!(n.body, "Sale");
    assert_eq!(n.tag, "default");
  }

  #[test]
  fn test_push_payload_that_is_not_an_object_is_ignored() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).from_push(Some(br#"["Sale"]"#));
    assert_eq!(n.title, "ShopPWA Notification");
    assert_eq!(n.body, "You have a new notification");
  }

  #[test]
  fn test_order_synced_descriptor() {
    let host = RecordingHost::new();
    let n = dispatcher(&host).order_synced("1042");
    assert_eq!(n.title, "Order Synced");
    assert_eq!(n.body, "Order #1042 has been processed successfully");
    assert_eq!(n.tag, "order-sync");
  }

  #[tokio::test]
  async fn test_view_focuses_existing_window() {
    let host = RecordingHost::new();
    host.add_window("other", url::Url::parse("https://elsewhere.example/").unwrap());
    host.add_window("w1", testing::url("/cart"));

    let outcome = dispatcher(&host).on_click("default", Some("view")).await.unwrap();

    assert_eq!(outcome, ClickOutcome::Focused("w1".to_string()));
    assert!(host.opened.lock().unwrap().is_empty());
    assert_eq!(*host.closed.lock().unwrap(), vec!["default".to_string()]);
  }

  #[tokio::test]
  async fn test_default_action_opens_window_when_none_open() {
    let host = RecordingHost::new();

    let outcome = dispatcher(&host).on_click("default", None).await.unwrap();

    assert_eq!(outcome, ClickOutcome::Opened(testing::url("/")));
    assert_eq!(*host.opened.lock().unwrap(), vec![testing::url("/")]);
  }

  #[tokio::test]
  async fn test_dismiss_only_closes() {
    let host = RecordingHost::new();
    host.add_window("w1", testing::url("/"));

    let outcome = dispatcher(&host).on_click("promo", Some("dismiss")).await.unwrap();

    assert_eq!(outcome, ClickOutcome::Closed);
    assert!(host.focused.lock().unwrap().is_empty());
    assert!(host.opened.lock().unwrap().is_empty());
    assert_eq!(*host.closed.lock().unwrap(), vec!["promo".to_string()]);
  }
}
