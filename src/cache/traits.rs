//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::warn;

use crate::http::{RequestKey, Response};

/// A stored response together with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Storage for named cache partitions.
///
/// Each partition maps a GET request key to a response snapshot. Writes are
/// atomic per key; callers never need to lock around them.
pub trait CacheStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Whether the partition exists.
  fn has(&self, partition: &str) -> Result<bool>;

  /// All partition names in creation order.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Drop a partition and every entry in it. Returns false if it did not exist.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response. Fails for non-GET keys and unknown partitions.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Remove a single entry. Returns false if nothing was stored under the key.
  fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool>;

  /// Keys stored in a partition.
  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>>;

  /// Static partition of the generation that last finished activating.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Record `partition` as the live static partition.
  fn set_active_generation(&self, partition: &str) -> Result<()>;

  /// Store a batch, creating the partition if needed. Either every entry
  /// lands or the partition is left as it was.
  ///
  /// Backends without transactions get this rollback-based version: a new
  /// partition is dropped again, an existing one has its replaced entries
  /// restored.
  fn put_batch(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let existed = self.has(partition)?;
    self.open(partition)?;

    let mut written = Vec::with_capacity(entries.len());
    let result = entries.iter().try_for_each(|(key, response)| -> Result<()> {
      let previous = if existed { self.get(partition, key)? } else { None };
      self.put(partition, key, response)?;
      written.push((key, previous));
      Ok(())
    });

    let Err(e) = result else {
      return Ok(());
    };

    if !existed {
      if let Err(undo) = self.delete_partition(partition) {
        warn!(%partition, error = %undo, "failed to drop partial partition");
      }
      return Err(e);
    }

    for (key, previous) in written.into_iter().rev() {
      let undo = match previous {
        Some(cached) => self.put(partition, key, &cached.response),
        None => self.delete(partition, key).map(|_| ()),
      };
      if let Err(undo) = undo {
        warn!(%partition, %key, error = %undo, "failed to restore cache entry");
      }
    }
    Err(e)
  }

  /// Search every partition as one logical space, oldest partition first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    for partition in self.partitions()? {
      if let Some(hit) = self.get(&partition, key)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }
}
