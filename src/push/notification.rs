//! Inbound push delivery and notification interaction routing.
//!
//! Push payloads come off the wire as untrusted JSON; anything missing or
//! malformed falls back to defaults, so a garbled message still produces a
//! usable notification and never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PushConfig;

/// One button on a displayed notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Navigation data attached to a notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationData {
  #[serde(default)]
  pub url: Option<String>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, Value>,
}

/// A fully resolved notification, ready for the display primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// Raw shape of a push message; every field optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  data: Option<NotificationData>,
  actions: Option<Vec<NotificationAction>>,
}

impl Notification {
  /// Resolve a push message into a displayable notification, tolerating a
  /// missing or malformed payload.
  pub fn from_push(raw: Option<&[u8]>, config: &PushConfig) -> Self {
    let payload = match raw {
      Some(bytes) => serde_json::from_slice::<PushPayload>(bytes).unwrap_or_else(|e| {
        warn!("malformed push payload, using defaults: {e}");
        PushPayload::default()
      }),
      None => PushPayload::default(),
    };

    Self {
      title: payload.title.unwrap_or_else(|| config.title.clone()),
      body: payload
        .body
        .unwrap_or_else(|| "You have a new notification".into()),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: vec![200, 100, 200],
      data: payload.data.unwrap_or_else(|| NotificationData {
        url: Some(config.default_url.clone()),
        extra: Default::default(),
      }),
      actions: payload.actions.unwrap_or_else(|| {
        vec![
          NotificationAction {
            action: "view".into(),
            title: "View Calendar".into(),
            icon: Some(config.icon.clone()),
          },
          NotificationAction {
            action: "dismiss".into(),
            title: "Dismiss".into(),
            icon: None,
          },
        ]
      }),
    }
  }
}

/// The platform's notification display primitive.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: Notification);
}

/// Handle an inbound push message: resolve and display. Fire-and-forget;
/// never raises.
pub fn deliver(raw: Option<&[u8]>, config: &PushConfig, sink: &dyn NotificationSink) {
  let notification = Notification::from_push(raw, config);
  debug!(title = %notification.title, "displaying push notification");
  sink.show(notification);
}

/// Where an interaction with a displayed notification should take the app.
///
/// The notification is considered dismissed either way; this only decides
/// navigation. `view` and the default tap follow the notification's data
/// URL; `dismiss` goes nowhere; anything unrecognized opens the app root.
pub fn interaction_target(action: Option<&str>, notification: &Notification) -> Option<String> {
  match action {
    None | Some("view") => Some(
      notification
        .data
        .url
        .clone()
        .unwrap_or_else(|| "/".into()),
    ),
    Some("dismiss") => None,
    Some(_) => Some("/".into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  /// Recording display primitive.
  struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
  }

  impl RecordingSink {
    fn new() -> Self {
      Self {
        shown: Mutex::new(Vec::new()),
      }
    }
  }

  impl NotificationSink for RecordingSink {
    fn show(&self, notification: Notification) {
      self.shown.lock().unwrap().push(notification);
    }
  }

  fn config() -> PushConfig {
    PushConfig::default()
  }

  #[test]
  fn well_formed_payload_is_displayed_verbatim() {
    let raw = serde_json::to_vec(&json!({
      "title": "Hearing",
      "body": "Tomorrow",
      "data": {"url": "/?tab=calendar&hearing=12"},
    }))
    .unwrap();

    let sink = RecordingSink::new();
    deliver(Some(&raw), &config(), &sink);

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Hearing");
    assert_eq!(shown[0].body, "Tomorrow");
    assert_eq!(shown[0].data.url.as_deref(), Some("/?tab=calendar&hearing=12"));
  }

  #[test]
  fn malformed_payload_falls_back_to_defaults() {
    let sink = RecordingSink::new();
    deliver(Some(b"{not json"), &config(), &sink);

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Docket");
    assert_eq!(shown[0].body, "You have a new notification");
    assert_eq!(shown[0].data.url.as_deref(), Some("/?tab=calendar"));
    assert_eq!(shown[0].vibrate, vec![200, 100, 200]);
  }

  #[test]
  fn missing_payload_falls_back_to_defaults() {
    let notification = Notification::from_push(None, &config());
    assert_eq!(notification.title, "Docket");
    assert_eq!(notification.actions.len(), 2);
    assert_eq!(notification.actions[0].action, "view");
  }

  #[test]
  fn view_and_default_tap_follow_the_data_url() {
    let raw = serde_json::to_vec(&json!({
      "data": {"url": "/?tab=calendar&hearing=3"},
    }))
    .unwrap();
    let notification = Notification::from_push(Some(&raw), &config());

    assert_eq!(
      interaction_target(Some("view"), &notification).as_deref(),
      Some("/?tab=calendar&hearing=3")
    );
    assert_eq!(
      interaction_target(None, &notification).as_deref(),
      Some("/?tab=calendar&hearing=3")
    );
  }

  #[test]
  fn default_tap_without_a_url_opens_root() {
    let raw = serde_json::to_vec(&json!({"data": {}})).unwrap();
    let notification = Notification::from_push(Some(&raw), &config());
    assert_eq!(interaction_target(None, &notification).as_deref(), Some("/"));
  }

  #[test]
  fn dismiss_does_not_navigate() {
    let notification = Notification::from_push(None, &config());
    assert_eq!(interaction_target(Some("dismiss"), &notification), None);
  }

  #[test]
  fn unrecognized_actions_open_root() {
    let notification = Notification::from_push(None, &config());
    assert_eq!(
      interaction_target(Some("snooze"), &notification).as_deref(),
      Some("/")
    );
  }
}
