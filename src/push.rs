//! Turning push payloads into notifications, and notification clicks into
//! navigation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::NotificationDefaults;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationButton {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: Map<String, Value>,
  pub actions: Vec<NotificationButton>,
}

impl Notification {
  /// The notification shown when a push carries no payload.
  pub fn with_defaults(defaults: &NotificationDefaults) -> Self {
    let mut data = Map::new();
    data.insert("dateOfArrival".to_string(), json!(Utc::now().timestamp_millis()));
    data.insert("primaryKey".to_string(), json!(1));

    Self {
      title: defaults.title.clone(),
      body: defaults.body.clone(),
      icon: defaults.icon.clone(),
      badge: defaults.badge.clone(),
      vibrate: defaults.vibrate.clone(),
      data,
      actions: vec![
        NotificationButton {
          action: "view".to_string(),
          title: "View Order".to_string(),
          icon: "/public/images/view-icon.png".to_string(),
        },
        NotificationButton {
          action: "close".to_string(),
          title: "Close".to_string(),
          icon: "/public/images/close-icon.png".to_string(),
        },
      ],
    }
  }

  /// Build the notification for a push event.
  ///
  /// A `message` string replaces the body; every payload field is merged into
  /// `data` on top of the defaults.
  pub fn from_payload(defaults: &NotificationDefaults, payload: Option<&[u8]>) -> Result<Self> {
    let mut notification = Self::with_defaults(defaults);

    let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
      return Ok(notification);
    };

    let value: Value =
      serde_json::from_slice(bytes).map_err(|e| eyre!("Malformed push payload: {}", e))?;
    let Value::Object(fields) = value else {
      return Err(eyre!("Push payload must be a JSON object"));
    };

    if let Some(message) = fields.get("message").and_then(Value::as_str) {
      if !message.is_empty() {
        notification.body = message.to_string();
      }
    }
    notification.data.extend(fields);

    Ok(notification)
  }
}

/// What the user clicked on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  /// "view" button: open the dashboard
  View,
  /// "close" button: dismiss only
  Close,
  /// The notification body: open the app root
  Default,
}

impl NotificationAction {
  pub fn parse(action: Option<&str>) -> Self {
    match action {
      Some("view") => NotificationAction::View,
      Some("close") => NotificationAction::Close,
      _ => NotificationAction::Default,
    }
  }

  /// Path to navigate to, if any.
  pub fn target<'a>(&self, defaults: &'a NotificationDefaults) -> Option<&'a str> {
    match self {
      NotificationAction::View => Some(defaults.view_url.as_str()),
      NotificationAction::Close => None,
      NotificationAction::Default => Some(defaults.root_url.as_str()),
    }
  }
}
