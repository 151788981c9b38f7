//! Install and activate: precaching the manifest and retiring old cache
//! generations.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::cache::{CacheLayer, CacheStore};
use crate::host::Clients;
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

/// Agent lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  /// Constructed, install not yet attempted
  Parsed,
  Installing,
  /// Manifest cached; skip-waiting was signalled so activation may follow at once
  Installed,
  Activating,
  /// Controlling pages
  Activated,
  /// Install failed; the previous agent stays in control
  Redundant,
}

impl fmt::Display for AgentState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      AgentState::Parsed => "parsed",
      AgentState::Installing => "installing",
      AgentState::Installed => "installed",
      AgentState::Activating => "activating",
      AgentState::Activated => "activated",
      AgentState::Redundant => "redundant",
    };
    f.write_str(s)
  }
}

/// Static partition population and generation cleanup.
pub struct Lifecycle<S: CacheStore> {
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  manifest: Vec<Url>,
}

impl<S: CacheStore> Lifecycle<S> {
  pub fn new(cache: CacheLayer<S>, network: Arc<dyn Network>, manifest: Vec<Url>) -> Self {
    Self {
      cache,
      network,
      manifest,
    }
  }

  /// Fetch every manifest URL and store the batch in the static partition.
  ///
  /// All-or-nothing: one failed fetch or non-ok status aborts the install
  /// before anything is written.
  pub async fn install(&self) -> Result<usize> {
    info!(
      partition = %self.cache.names().static_name,
      assets = self.manifest.len(),
      "caching static files"
    );

    let fetches = self.manifest.iter().map(|url| self.fetch_asset(url));
    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        error!(error = %e, "error caching static files");
        return Err(e);
      }
    };

    self.cache.store_static(&entries)?;
    info!(count = entries.len(), "static files cached");

    Ok(entries.len())
  }

  async fn fetch_asset(&self, url: &Url) -> Result<(RequestKey, Response)> {
    let request = Request::get(url.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    if !response.ok() {
      return Err(eyre!(
        "Failed to fetch {}: server answered {}",
        url,
        response.status
      ));
    }

    Ok((request.key(), response))
  }

  /// Drop stale generations, then take control of open pages.
  pub async fn activate(&self, clients: &dyn Clients) -> Result<Vec<String>> {
    let pruned = self.cache.prune_stale()?;
    clients.claim().await?;
    self.cache.mark_active()?;
    info!(pruned = pruned.len(), "activated");
    Ok(pruned)
  }
}
