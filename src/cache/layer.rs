//! Cache layer that owns the agent's static and dynamic partitions.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::traits::{CacheStore, CachedResponse};
use crate::config::CacheConfig;
use crate::http::{RequestKey, Response};

/// Partition names derived from the naming prefix and the version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  prefix: String,
  pub static_name: String,
  pub dynamic_name: String,
}

impl CacheNames {
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      prefix: config.prefix.clone(),
      static_name: format!("{}-static-{}", config.prefix, config.version),
      dynamic_name: format!("{}-dynamic-{}", config.prefix, config.version),
    }
  }

  /// Whether `name` follows this agent's naming scheme, whatever its version.
  pub fn owns(&self, name: &str) -> bool {
    name
      .strip_prefix(self.prefix.as_str())
      .is_some_and(|rest| rest.starts_with('-'))
  }

  /// Whether `name` is one of the two live partitions of this generation.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }

  /// An owned partition from another generation.
  pub fn is_stale(&self, name: &str) -> bool {
    self.owns(name) && !self.is_current(name)
  }
}

/// Cache layer over a [`CacheStore`].
///
/// Lookups treat the whole store as one logical space; writes go to the
/// current generation's static or dynamic partition.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
  names: CacheNames,
}

impl<S: CacheStore> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>, config: &CacheConfig) -> Self {
    Self {
      storage,
      names: CacheNames::new(config),
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Find a stored response in any partition.
  pub fn lookup(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let hit = self.storage.match_any(key)?;
    if hit.is_some() {
      debug!(%key, "cache hit");
    }
    Ok(hit)
  }

  /// Write a whole batch into the static partition, all or nothing.
  pub fn store_static(&self, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.storage.put_batch(&self.names.static_name, entries)
  }

  /// Copy a network response into the dynamic partition.
  pub fn store_dynamic(&self, key: &RequestKey, response: &Response) -> Result<()> {
    self.storage.open(&self.names.dynamic_name)?;
    self.storage.put(&self.names.dynamic_name, key, response)?;
    debug!(%key, partition = %self.names.dynamic_name, "cached dynamic content");
    Ok(())
  }

  /// Record this generation as the one controlling pages.
  pub fn mark_active(&self) -> Result<()> {
    self.storage.set_active_generation(&self.names.static_name)
  }

  /// Whether this generation finished activating, in this process or an
  /// earlier one.
  pub fn is_active(&self) -> Result<bool> {
    let active = self.storage.active_generation()?;
    Ok(
      active.as_deref() == Some(self.names.static_name.as_str())
        && self.storage.has(&self.names.static_name)?,
    )
  }

  /// Delete every owned partition that is not part of the current generation.
  ///
  /// Partitions outside the naming scheme are left alone.
  pub fn prune_stale(&self) -> Result<Vec<String>> {
    let mut pruned = Vec::new();
    for name in self.storage.partitions()? {
      if self.names.is_stale(&name) {
        info!(partition = %name, "deleting old cache");
        if self.storage.delete_partition(&name)? {
          pruned.push(name);
        }
      }
    }
    Ok(pruned)
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: self.names.clone(),
    }
  }
}
