//! Offline queue trait and its SQLite / in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::Mutex;

use super::types::{OfflineCart, OfflineOrder};
use crate::db::Database;

/// Durable store for mutations attempted while offline.
///
/// Records leave the queue only through `remove_order` / `clear_cart`.
pub trait OfflineQueue: Send + Sync {
  /// Queue an order body. Uses the body's `id` field when present, otherwise
  /// generates one and writes it back into the body. Returns the id.
  fn enqueue_order(&self, payload: Value) -> Result<String>;

  /// Pending orders in enqueue order.
  fn orders(&self) -> Result<Vec<OfflineOrder>>;

  /// Remove a single order. Returns false if it was not queued.
  fn remove_order(&self, id: &str) -> Result<bool>;

  /// Replace the pending cart.
  fn save_cart(&self, cart: &OfflineCart) -> Result<()>;

  fn cart(&self) -> Result<Option<OfflineCart>>;

  fn clear_cart(&self) -> Result<()>;

  fn pending_orders(&self) -> Result<usize> {
    Ok(self.orders()?.len())
  }
}

/// Take the order id from the payload, or stamp a fresh one into it.
fn assign_order_id(payload: &mut Value) -> Result<String> {
  let object = payload
    .as_object_mut()
    .ok_or_else(|| eyre!("Offline order must be a JSON object"))?;

  let id = match object.get("id") {
    Some(Value::String(s)) if !s.is_empty() => s.clone(),
    Some(Value::Number(n)) => n.to_string(),
    Some(other) => return Err(eyre!("Unsupported order id: {}", other)),
    None => {
      let id = generate_order_id();
      object.insert("id".to_string(), Value::String(id.clone()));
      id
    }
  };

  Ok(id)
}

fn generate_order_id() -> String {
  use std::sync::atomic::{AtomicU64, Ordering};
  static COUNTER: AtomicU64 = AtomicU64::new(0);

  let now = Utc::now();
  format!(
    "offline-{}-{}",
    now.timestamp_millis(),
    COUNTER.fetch_add(1, Ordering::Relaxed)
  )
}

/// SQLite-backed offline queue.
#[derive(Clone)]
pub struct SqliteOfflineQueue {
  db: Database,
}

impl SqliteOfflineQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl OfflineQueue for SqliteOfflineQueue {
  fn enqueue_order(&self, mut payload: Value) -> Result<String> {
    let id = assign_order_id(&mut payload)?;
    let data =
      serde_json::to_vec(&payload).map_err(|e| eyre!("Failed to serialize order: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO offline_orders (id, payload, queued_at)
         VALUES (?, ?, datetime('now'))",
        params![id, data],
      )
      .map_err(|e| eyre!("Failed to queue order {}: {}", id, e))?;

    Ok(id)
  }

  fn orders(&self) -> Result<Vec<OfflineOrder>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, payload, queued_at FROM offline_orders ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query offline orders: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read offline order: {}", e))?;

    rows
      .into_iter()
      .map(|(id, data, queued_at)| {
        let payload = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize order {}: {}", id, e))?;
        Ok(OfflineOrder {
          id,
          payload,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove_order(&self, id: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM offline_orders WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove order {}: {}", id, e))?;
    Ok(removed > 0)
  }

  fn save_cart(&self, cart: &OfflineCart) -> Result<()> {
    let data = serde_json::to_vec(cart).map_err(|e| eyre!("Failed to serialize cart: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO offline_cart (slot, payload, updated_at)
         VALUES (1, ?, datetime('now'))",
        params![data],
      )
      .map_err(|e| eyre!("Failed to save cart: {}", e))?;
    Ok(())
  }

  fn cart(&self) -> Result<Option<OfflineCart>> {
    let conn = self.db.conn()?;
    let data: Option<Vec<u8>> = conn
      .query_row("SELECT payload FROM offline_cart WHERE slot = 1", [], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to query cart: {}", e))?;

    data
      .map(|d| serde_json::from_slice(&d).map_err(|e| eyre!("Failed to deserialize cart: {}", e)))
      .transpose()
  }

  fn clear_cart(&self) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM offline_cart", [])
      .map_err(|e| eyre!("Failed to clear cart: {}", e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// In-memory offline queue.
#[derive(Default)]
pub struct MemoryOfflineQueue {
  orders: Mutex<Vec<OfflineOrder>>,
  cart: Mutex<Option<OfflineCart>>,
}

impl MemoryOfflineQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl OfflineQueue for MemoryOfflineQueue {
  fn enqueue_order(&self, mut payload: Value) -> Result<String> {
    let id = assign_order_id(&mut payload)?;
    let mut orders = self
      .orders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    orders.retain(|o| o.id != id);
    orders.push(OfflineOrder {
      id: id.clone(),
      payload,
      queued_at: Utc::now(),
    });
    Ok(id)
  }

  fn orders(&self) -> Result<Vec<OfflineOrder>> {
    let orders = self
      .orders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(orders.clone())
  }

  fn remove_order(&self, id: &str) -> Result<bool> {
    let mut orders = self
      .orders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = orders.len();
    orders.retain(|o| o.id != id);
    Ok(orders.len() != before)
  }

  fn save_cart(&self, cart: &OfflineCart) -> Result<()> {
    *self.cart.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(cart.clone());
    Ok(())
  }

  fn cart(&self) -> Result<Option<OfflineCart>> {
    Ok(
      self
        .cart
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone(),
    )
  }

  fn clear_cart(&self) -> Result<()> {
    *self.cart.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = None;
    Ok(())
  }
}
