//! Cache-first interception of outgoing requests.
//!
//! 1. Non-GET and non-http(s) requests pass through untouched
//! 2. A hit in any partition is served without touching the network
//! 3. Otherwise fetch; same-origin 200s matching the dynamic rules are copied
//!    into the dynamic partition
//! 4. On network failure, HTML and image requests get an offline fallback;
//!    everything else sees the error

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore};
use crate::config::{Config, DynamicRules};
use crate::http::{Method, Request, RequestKey, Response};
use crate::network::{Network, NetworkError};

const OFFLINE_HTML: &str = "<h1>Offline</h1><p>Please check your internet connection.</p>";

/// What the agent did with an intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  /// Served from the cache
  Cached(Response),
  /// Fresh network response
  Network(Response),
  /// Network failed; offline page, placeholder image or empty 404
  Fallback(Response),
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&Response> {
    match self {
      FetchOutcome::Passthrough => None,
      FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::Fallback(r) => Some(r),
    }
  }

  pub fn into_response(self) -> Option<Response> {
    match self {
      FetchOutcome::Passthrough => None,
      FetchOutcome::Cached(r) | FetchOutcome::Network(r) | FetchOutcome::Fallback(r) => Some(r),
    }
  }
}

pub struct FetchPolicy<S: CacheStore> {
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  rules: DynamicRules,
  offline_page: RequestKey,
  offline_image: RequestKey,
}

impl<S: CacheStore> FetchPolicy<S> {
  pub fn new(
    cache: CacheLayer<S>,
    network: Arc<dyn Network>,
    config: &Config,
  ) -> color_eyre::Result<Self> {
    Ok(Self {
      cache,
      network,
      rules: config.dynamic.clone(),
      offline_page: RequestKey::get(&config.resolve(&config.offline.page)?),
      offline_image: RequestKey::get(&config.resolve(&config.offline.image)?),
    })
  }

  /// Whether a successful response for `url` is copied into the dynamic partition.
  pub fn should_cache_dynamically(&self, url: &Url) -> bool {
    self.rules.matches(url)
  }

  pub async fn handle(&self, request: &Request) -> Result<FetchOutcome, NetworkError> {
    if request.method != Method::Get || !request.is_http() {
      return Ok(FetchOutcome::Passthrough);
    }

    let key = request.key();
    if let Some(cached) = self.cached(&key) {
      debug!(url = %request.url, "serving from cache");
      return Ok(FetchOutcome::Cached(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() && self.should_cache_dynamically(&request.url) {
          // A failed write never reaches the caller
          if let Err(e) = self.cache.store_dynamic(&key, &response) {
            warn!(url = %request.url, error = %e, "failed to cache dynamic content");
          }
        }
        Ok(FetchOutcome::Network(response))
      }
      Err(err) => {
        info!(url = %request.url, error = %err, "network fetch failed");
        self.fallback(request, err)
      }
    }
  }

  fn fallback(&self, request: &Request, err: NetworkError) -> Result<FetchOutcome, NetworkError> {
    if request.accepts_html() {
      let page = self
        .cached(&self.offline_page)
        .unwrap_or_else(|| Response::html(OFFLINE_HTML));
      return Ok(FetchOutcome::Fallback(page));
    }

    if request.accepts_image() {
      let image = self
        .cached(&self.offline_image)
        .unwrap_or_else(|| Response::empty(404));
      return Ok(FetchOutcome::Fallback(image));
    }

    Err(err)
  }

  /// Cache lookup where a storage error counts as a miss.
  fn cached(&self, key: &RequestKey) -> Option<Response> {
    match self.cache.lookup(key) {
      Ok(hit) => hit.map(|c| c.response),
      Err(e) => {
        warn!(%key, error = %e, "cache lookup failed");
        None
      }
    }
  }
}
