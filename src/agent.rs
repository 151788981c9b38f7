//! The offline agent: one entry point per platform event.
//!
//! The host calls [`Agent::dispatch`] for every event and awaits the returned
//! future to completion before considering the event settled, so all cache
//! writes and network calls a handler starts are finished by the time it
//! returns.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore, SqliteCacheStore};
use crate::config::Config;
use crate::db::Database;
use crate::fetch::{FetchOutcome, FetchPolicy};
use crate::host::{Clients, LoggingHost, Notifier};
use crate::http::Request;
use crate::lifecycle::{AgentState, Lifecycle};
use crate::network::{HttpNetwork, Network, NetworkError};
use crate::push::{Notification, NotificationAction};
use crate::queue::{OfflineCart, OfflineQueue, SqliteOfflineQueue};
use crate::sync::{SyncCoordinator, SyncError, SyncReport, SyncTag};

/// Platform events the agent reacts to.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Deferred sync fired with the given tag
  Sync(String),
  /// Push message with its raw payload
  Push(Option<Vec<u8>>),
  /// Notification clicked; `None` means the body rather than a button
  NotificationClick { action: Option<String> },
}

/// What a handler did.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed { assets: usize },
  Activated { pruned: Vec<String> },
  Fetch(FetchOutcome),
  Synced(SyncReport),
  Notified(Notification),
  /// Window focused or opened, `None` when the click only dismissed
  Navigated(Option<Url>),
  /// Event not meant for this agent
  Ignored,
}

/// Capabilities injected by the host.
pub struct Capabilities {
  pub network: Arc<dyn Network>,
  pub queue: Arc<dyn OfflineQueue>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct AgentStatus {
  pub state: AgentState,
  pub static_partition: String,
  pub dynamic_partition: String,
  /// Every partition in the store with its entry count
  pub partitions: Vec<(String, usize)>,
  pub pending_orders: usize,
  pub cart_items: usize,
}

pub struct Agent<S: CacheStore> {
  config: Config,
  state: Mutex<AgentState>,
  cache: CacheLayer<S>,
  lifecycle: Lifecycle<S>,
  fetch: FetchPolicy<S>,
  sync: SyncCoordinator,
  queue: Arc<dyn OfflineQueue>,
  clients: Arc<dyn Clients>,
  notifier: Arc<dyn Notifier>,
}

impl Agent<SqliteCacheStore> {
  /// Agent backed by the SQLite database from the config and a real HTTP client.
  pub fn open(config: Config) -> Result<Self> {
    let path = config.storage.resolve_path()?;
    let db = Database::open(&path)?;
    info!(path = %path.display(), "opened agent database");

    let host = Arc::new(LoggingHost::new());
    let capabilities = Capabilities {
      network: Arc::new(HttpNetwork::new(&config.origin)?),
      queue: Arc::new(SqliteOfflineQueue::new(db.clone())),
      clients: host.clone(),
      notifier: host,
    };

    Self::new(config, Arc::new(SqliteCacheStore::new(db)), capabilities)
  }
}

impl<S: CacheStore> Agent<S> {
  pub fn new(config: Config, store: Arc<S>, capabilities: Capabilities) -> Result<Self> {
    let cache = CacheLayer::new(store, &config.cache);

    let manifest = config
      .manifest
      .iter()
      .map(|entry| config.resolve(entry))
      .collect::<Result<Vec<_>>>()?;

    let sync = SyncCoordinator::new(
      capabilities.queue.clone(),
      capabilities.network.clone(),
      config.resolve(&config.endpoints.orders)?,
      config.resolve(&config.endpoints.cart_sync)?,
    );

    Ok(Self {
      lifecycle: Lifecycle::new(cache.clone(), capabilities.network.clone(), manifest),
      fetch: FetchPolicy::new(cache.clone(), capabilities.network, &config)?,
      cache,
      sync,
      queue: capabilities.queue,
      clients: capabilities.clients,
      notifier: capabilities.notifier,
      state: Mutex::new(AgentState::Parsed),
      config,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn state(&self) -> AgentState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(AgentState::Redundant)
  }

  fn set_state(&self, state: AgentState) -> Result<()> {
    *self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = state;
    Ok(())
  }

  /// Pick up an agent a previous process already activated. A generation
  /// that was only installed, or whose install failed, starts from scratch.
  pub fn resume(&self) -> Result<AgentState> {
    if self.state() == AgentState::Parsed && self.cache.is_active()? {
      self.set_state(AgentState::Activated)?;
    }
    Ok(self.state())
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    match event {
      Event::Install => Ok(EventOutcome::Installed {
        assets: self.install().await?,
      }),
      Event::Activate => Ok(EventOutcome::Activated {
        pruned: self.activate().await?,
      }),
      Event::Fetch(request) => Ok(EventOutcome::Fetch(self.handle_fetch(&request).await?)),
      Event::Sync(tag) => match tag.parse::<SyncTag>() {
        Ok(tag) => Ok(EventOutcome::Synced(self.sync(tag).await?)),
        Err(e) => {
          warn!(error = %e, "ignoring sync event");
          Ok(EventOutcome::Ignored)
        }
      },
      Event::Push(payload) => Ok(EventOutcome::Notified(self.push(payload.as_deref()).await?)),
      Event::NotificationClick { action } => Ok(EventOutcome::Navigated(
        self.notification_click(action.as_deref()).await?,
      )),
    }
  }

  /// Precache the manifest. On success the agent skips waiting and is ready
  /// to activate at once; on failure it becomes redundant.
  pub async fn install(&self) -> Result<usize> {
    info!(version = %self.config.cache.version, "installing");
    self.set_state(AgentState::Installing)?;

    match self.lifecycle.install().await {
      Ok(count) => {
        info!("skip waiting");
        self.set_state(AgentState::Installed)?;
        Ok(count)
      }
      Err(e) => {
        self.set_state(AgentState::Redundant)?;
        Err(e)
      }
    }
  }

  /// Remove stale generations and claim open pages.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let state = self.state();
    if state != AgentState::Installed {
      return Err(eyre!("Cannot activate agent in state {}", state));
    }

    info!("activating");
    self.set_state(AgentState::Activating)?;
    let pruned = self.lifecycle.activate(self.clients.as_ref()).await?;
    self.set_state(AgentState::Activated)?;
    Ok(pruned)
  }

  /// Apply the fetch policy. Until activation the agent does not control
  /// pages, so every request passes through.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, NetworkError> {
    if self.state() != AgentState::Activated {
      return Ok(FetchOutcome::Passthrough);
    }
    self.fetch.handle(request).await
  }

  pub async fn sync(&self, tag: SyncTag) -> Result<SyncReport, SyncError> {
    self.sync.run(tag).await
  }

  pub async fn push(&self, payload: Option<&[u8]>) -> Result<Notification> {
    info!("push notification received");
    let notification = Notification::from_payload(&self.config.notification, payload)?;
    self.notifier.show(&notification).await?;
    Ok(notification)
  }

  pub async fn notification_click(&self, action: Option<&str>) -> Result<Option<Url>> {
    let action = NotificationAction::parse(action);
    info!(?action, "notification clicked");

    let Some(target) = action.target(&self.config.notification) else {
      return Ok(None);
    };

    let url = self.config.resolve(target)?;
    self.clients.open_or_focus(&url).await?;
    Ok(Some(url))
  }

  /// Queue an order the page could not submit. Returns its id.
  pub fn queue_order(&self, payload: Value) -> Result<String> {
    let id = self.queue.enqueue_order(payload)?;
    info!(order = %id, "queued offline order");
    Ok(id)
  }

  /// Replace the pending offline cart.
  pub fn queue_cart(&self, cart: &OfflineCart) -> Result<()> {
    self.queue.save_cart(cart)?;
    info!(items = cart.items.len(), "saved offline cart");
    Ok(())
  }

  pub fn status(&self) -> Result<AgentStatus> {
    let store = self.cache.storage();
    let partitions = store
      .partitions()?
      .into_iter()
      .map(|name| {
        let count = store.keys(&name)?.len();
        Ok((name, count))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(AgentStatus {
      state: self.state(),
      static_partition: self.cache.names().static_name.clone(),
      dynamic_partition: self.cache.names().dynamic_name.clone(),
      partitions,
      pending_orders: self.queue.pending_orders()?,
      cart_items: self.queue.cart()?.map(|c| c.items.len()).unwrap_or(0),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCacheStore;
  use crate::http::{Method, RequestKey, Response};
  use crate::queue::MemoryOfflineQueue;
  use crate::testing::{FailingStore, RecordingHost, ScriptedNetwork};
  use serde_json::json;

  struct Harness<S: CacheStore> {
    store: Arc<S>,
    network: Arc<ScriptedNetwork>,
    queue: Arc<MemoryOfflineQueue>,
    host: Arc<RecordingHost>,
    agent: Agent<S>,
  }

  fn small_config(version: &str) -> Config {
    let mut config = Config::default();
    config.cache.version = version.to_string();
    config.manifest = vec!["/".to_string(), "/offline.html".to_string()];
    config
  }

  fn harness_with<S: CacheStore>(config: Config, store: Arc<S>) -> Harness<S> {
    let network = Arc::new(ScriptedNetwork::new());
    network
      .page("http://localhost/", "home")
      .page("http://localhost/offline.html", "<h1>offline page</h1>");
    let queue = Arc::new(MemoryOfflineQueue::new());
    let host = Arc::new(RecordingHost::default());

    let agent = Agent::new(
      config,
      store.clone(),
      Capabilities {
        network: network.clone(),
        queue: queue.clone(),
        clients: host.clone(),
        notifier: host.clone(),
      },
    )
    .unwrap();

    Harness {
      store,
      network,
      queue,
      host,
      agent,
    }
  }

  fn harness() -> Harness<MemoryCacheStore> {
    harness_with(small_config("v1"), Arc::new(MemoryCacheStore::new()))
  }

  fn url(path: &str) -> Url {
    Url::parse("http://localhost/").unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let h = harness();
    assert_eq!(h.agent.state(), AgentState::Parsed);

    let outcome = h.agent.dispatch(Event::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Installed { assets: 2 }));
    assert_eq!(h.agent.state(), AgentState::Installed);

    h.agent.dispatch(Event::Activate).await.unwrap();
    assert_eq!(h.agent.state(), AgentState::Activated);
    assert_eq!(*h.host.claims.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_failed_install_leaves_agent_redundant() {
    let mut config = small_config("v1");
    config.manifest.push("/public/js/app.js".to_string());
    let h = harness_with(config, Arc::new(MemoryCacheStore::new()));

    assert!(h.agent.dispatch(Event::Install).await.is_err());
    assert_eq!(h.agent.state(), AgentState::Redundant);
    assert!(h.agent.dispatch(Event::Activate).await.is_err());
  }

  #[tokio::test]
  async fn test_fetch_passes_through_before_activation() {
    let h = harness();
    let outcome = h.agent.handle_fetch(&Request::get(url("/"))).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert_eq!(h.network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_precached_urls_served_without_network() {
    let h = harness();
    h.agent.install().await.unwrap();
    h.agent.activate().await.unwrap();
    let calls = h.network.call_count();

    let outcome = h.agent.handle_fetch(&Request::get(url("/"))).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Cached(ref r) if r.body == b"home"));
    assert_eq!(h.network.call_count(), calls);
  }

  #[tokio::test]
  async fn test_offline_html_uses_precached_page() {
    let h = harness();
    h.agent.install().await.unwrap();
    h.agent.activate().await.unwrap();

    let request = Request::get(url("/browse")).with_header("accept", "text/html");
    let outcome = h.agent.handle_fetch(&request).await.unwrap();

    assert_eq!(
      outcome,
      FetchOutcome::Fallback(Response::new(200, b"<h1>offline page</h1>".to_vec()).with_kind(
        crate::http::ResponseKind::Basic
      ))
    );
  }

  #[tokio::test]
  async fn test_new_version_prunes_previous_generation() {
    let store = Arc::new(MemoryCacheStore::new());
    store.open("someone-elses-cache").unwrap();

    let v1 = harness_with(small_config("v1"), store.clone());
    v1.agent.install().await.unwrap();
    v1.agent.activate().await.unwrap();
    v1.network.page("http://localhost/api/menu/1", "[]");
    v1.agent
      .handle_fetch(&Request::get(url("/api/menu/1")))
      .await
      .unwrap();
    assert!(store.has("time2eat-dynamic-v1").unwrap());

    let v2 = harness_with(small_config("v2"), store.clone());
    v2.agent.install().await.unwrap();
    let outcome = v2.agent.dispatch(Event::Activate).await.unwrap();

    let EventOutcome::Activated { pruned } = outcome else {
      panic!("expected activation");
    };
    assert_eq!(pruned, vec!["time2eat-static-v1", "time2eat-dynamic-v1"]);
    assert_eq!(
      v2.store.partitions().unwrap(),
      vec!["someone-elses-cache", "time2eat-static-v2"]
    );
    assert!(v2
      .store
      .get("time2eat-static-v2", &RequestKey::get(&url("/")))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_resume_reactivates_installed_generation() {
    let store = Arc::new(MemoryCacheStore::new());
    let first = harness_with(small_config("v1"), store.clone());
    first.agent.install().await.unwrap();
    first.agent.activate().await.unwrap();

    let restarted = harness_with(small_config("v1"), store.clone());
    assert_eq!(restarted.agent.resume().unwrap(), AgentState::Activated);

    let fresh = harness_with(small_config("v9"), store);
    assert_eq!(fresh.agent.resume().unwrap(), AgentState::Parsed);
  }

  #[tokio::test]
  async fn test_install_with_failing_storage_never_resumes_active() {
    let store = Arc::new(FailingStore::nth_put(2));
    let h = harness_with(small_config("v1"), store.clone());

    assert!(h.agent.install().await.is_err());
    assert_eq!(h.agent.state(), AgentState::Redundant);
    assert!(!store.has("time2eat-static-v1").unwrap());
    assert!(store.keys("time2eat-static-v1").unwrap().is_empty());

    let restarted = harness_with(small_config("v1"), store);
    assert_eq!(restarted.agent.resume().unwrap(), AgentState::Parsed);
    let outcome = restarted
      .agent
      .handle_fetch(&Request::get(url("/")))
      .await
      .unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
  }

  #[tokio::test]
  async fn test_installed_but_not_activated_does_not_resume() {
    let store = Arc::new(MemoryCacheStore::new());
    let first = harness_with(small_config("v1"), store.clone());
    first.agent.install().await.unwrap();

    let restarted = harness_with(small_config("v1"), store);
    assert_eq!(restarted.agent.resume().unwrap(), AgentState::Parsed);
  }

  #[tokio::test]
  async fn test_fetch_error_surfaces_through_dispatch() {
    let h = harness();
    h.agent.install().await.unwrap();
    h.agent.activate().await.unwrap();

    let request = Request::get(url("/api/orders/5")).with_header("accept", "application/json");
    let err = h.agent.dispatch(Event::Fetch(request)).await.unwrap_err();

    assert!(err.downcast_ref::<NetworkError>().is_some());
  }

  #[tokio::test]
  async fn test_sync_events() {
    let h = harness();
    h.agent.queue_order(json!({"id": "o1"})).unwrap();
    h.network
      .respond(Method::Post, "http://localhost/api/orders", Response::new(200, Vec::new()));

    let outcome = h
      .agent
      .dispatch(Event::Sync("order-sync".to_string()))
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::Synced(SyncReport { synced: 1, .. })));
    assert_eq!(h.queue.pending_orders().unwrap(), 0);

    let ignored = h
      .agent
      .dispatch(Event::Sync("periodic-refresh".to_string()))
      .await
      .unwrap();
    assert!(matches!(ignored, EventOutcome::Ignored));
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let h = harness();

    let payload = br#"{"message": "Order #12 is on its way", "orderId": 12}"#.to_vec();
    h.agent.dispatch(Event::Push(Some(payload))).await.unwrap();
    let shown = h.host.shown.lock().unwrap().clone();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].body, "Order #12 is on its way");

    let view = h
      .agent
      .dispatch(Event::NotificationClick {
        action: Some("view".to_string()),
      })
      .await
      .unwrap();
    assert!(matches!(view, EventOutcome::Navigated(Some(ref u)) if u.path() == "/dashboard"));

    h.agent
      .dispatch(Event::NotificationClick {
        action: Some("close".to_string()),
      })
      .await
      .unwrap();
    h.agent
      .dispatch(Event::NotificationClick { action: None })
      .await
      .unwrap();

    let opened: Vec<_> = h
      .host
      .opened
      .lock()
      .unwrap()
      .iter()
      .map(|u| u.path().to_string())
      .collect();
    assert_eq!(opened, vec!["/dashboard", "/"]);
  }

  #[tokio::test]
  async fn test_status() {
    let h = harness();
    h.agent.install().await.unwrap();
    h.agent.queue_order(json!({"total": 10})).unwrap();
    h.agent
      .queue_cart(&OfflineCart {
        items: vec![json!({"id": 1}), json!({"id": 2})],
        ..Default::default()
      })
      .unwrap();

    let status = h.agent.status().unwrap();
    assert_eq!(status.state, AgentState::Installed);
    assert_eq!(status.partitions, vec![("time2eat-static-v1".to_string(), 2)]);
    assert_eq!(status.pending_orders, 1);
    assert_eq!(status.cart_items, 2);
  }
}
