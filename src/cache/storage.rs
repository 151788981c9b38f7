//! SQLite and in-memory implementations of [`CacheStore`].

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::traits::{CacheStore, CachedResponse};
use crate::db::Database;
use crate::http::{Headers, Method, RequestKey, Response, ResponseKind};

fn ensure_get(key: &RequestKey) -> Result<()> {
  if key.is_get() {
    Ok(())
  } else {
    Err(eyre!("Refusing to cache non-GET request: {}", key))
  }
}

fn insert_entry(
  conn: &Connection,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  ensure_get(key)?;

  let kind = serde_json::to_string(&response.kind)
    .map_err(|e| eyre!("Failed to encode response kind: {}", e))?;
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to encode headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, key_hash, method, url, status, kind, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key.hash(),
        key.method.as_str(),
        key.url,
        response.status,
        kind,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, partition, e))?;

  Ok(())
}

/// SQLite-based cache storage.
#[derive(Clone)]
pub struct SqliteCacheStore {
  db: Database,
}

impl SqliteCacheStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStore for SqliteCacheStore {
  fn open(&self, partition: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open cache partition {}: {}", partition, e))?;
    Ok(())
  }

  fn has(&self, partition: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_partitions WHERE name = ?",
        params![partition],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache partition: {}", e))?;
    Ok(found.is_some())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache partition: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_partitions WHERE name = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete cache partition: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, String, Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT status, kind, headers, body, url, cached_at FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let Some((status, kind, headers, body, url, cached_at)) = row else {
      return Ok(None);
    };

    let kind: ResponseKind = serde_json::from_str(&kind)
      .map_err(|e| eyre!("Failed to decode response kind '{}': {}", kind, e))?;
    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to decode cached headers: {}", e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
        kind,
        url: url::Url::parse(&url).ok(),
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;
    insert_entry(&conn, partition, key, response)
  }

  fn put_batch(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open cache partition {}: {}", partition, e))?;

    for (key, response) in entries {
      insert_entry(&tx, partition, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit {} entries to {}: {}", entries.len(), partition, e))?;
    Ok(())
  }

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(removed > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE partition = ? ORDER BY cached_at, url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![partition], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url)| {
        let method: Method = method.parse().map_err(|e: String| eyre!(e))?;
        Ok(RequestKey { method, url })
      })
      .collect()
  }

  fn active_generation(&self) -> Result<Option<String>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT active_static FROM agent_state WHERE slot = 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  fn set_active_generation(&self, partition: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO agent_state (slot, active_static, activated_at)
         VALUES (1, ?, datetime('now'))",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to record active generation: {}", e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// In-memory cache storage.
#[derive(Default)]
pub struct MemoryCacheStore {
  partitions: RwLock<Vec<(String, HashMap<String, (RequestKey, CachedResponse)>)>>,
  active: Mutex<Option<String>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryCacheStore {
  fn open(&self, partition: &str) -> Result<()> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !partitions.iter().any(|(name, _)| name == partition) {
      partitions.push((partition.to_string(), HashMap::new()));
    }
    Ok(())
  }

  fn has(&self, partition: &str) -> Result<bool> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.iter().any(|(name, _)| name == partition))
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = partitions.len();
    partitions.retain(|(name, _)| name != partition);
    Ok(partitions.len() != before)
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .iter()
        .find(|(name, _)| name == partition)
        .and_then(|(_, entries)| entries.get(&key.hash()))
        .map(|(_, cached)| cached.clone()),
    )
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    ensure_get(key)?;

    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let (_, entries) = partitions
      .iter_mut()
      .find(|(name, _)| name == partition)
      .ok_or_else(|| eyre!("Unknown cache partition: {}", partition))?;

    entries.insert(
      key.hash(),
      (
        key.clone(),
        CachedResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      ),
    );
    Ok(())
  }

  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .iter_mut()
        .find(|(name, _)| name == partition)
        .map(|(_, entries)| entries.remove(&key.hash()).is_some())
        .unwrap_or(false),
    )
  }

  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .iter()
        .find(|(name, _)| name == partition)
        .map(|(_, entries)| entries.values().map(|(key, _)| key.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn put_batch(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    for (key, _) in entries {
      ensure_get(key)?;
    }

    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let index = match partitions.iter().position(|(name, _)| name == partition) {
      Some(index) => index,
      None => {
        partitions.push((partition.to_string(), HashMap::new()));
        partitions.len() - 1
      }
    };

    let cached_at = Utc::now();
    let (_, stored) = &mut partitions[index];
    for (key, response) in entries {
      stored.insert(
        key.hash(),
        (
          key.clone(),
          CachedResponse {
            response: response.clone(),
            cached_at,
          },
        ),
      );
    }
    Ok(())
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(
      self
        .active
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone(),
    )
  }

  fn set_active_generation(&self, partition: &str) -> Result<()> {
    *self
      .active
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(partition.to_string());
    Ok(())
  }
}
