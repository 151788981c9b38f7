use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An order submitted while offline, waiting for the next sync.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineOrder {
  /// Stable identifier; also the `id` field of the posted body
  pub id: String,
  /// JSON body posted to the orders endpoint
  pub payload: Value,
  pub queued_at: DateTime<Utc>,
}

/// The cart as it stood when the client went offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfflineCart {
  #[serde(default)]
  pub items: Vec<Value>,
  /// Any other fields the page stored alongside the items
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl OfflineCart {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}
