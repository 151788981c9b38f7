//! Background sync: flushing offline orders and the offline cart once the
//! host reports connectivity.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::http::Request;
use crate::network::Network;
use crate::queue::OfflineQueue;

/// Named sync tasks the host may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  Orders,
  Cart,
}

impl SyncTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Orders => "order-sync",
      SyncTag::Cart => "cart-sync",
    }
  }
}

impl FromStr for SyncTag {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "order-sync" => Ok(SyncTag::Orders),
      "cart-sync" => Ok(SyncTag::Cart),
      other => Err(SyncError::UnknownTag(other.to_string())),
    }
  }
}

impl fmt::Display for SyncTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Counts for one run of a sync task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("unknown sync tag: {0}")]
  UnknownTag(String),

  /// Some items stayed queued; the host should retry later.
  #[error("{tag} incomplete: {} of {} items still queued", .report.failed, .report.attempted)]
  Incomplete { tag: SyncTag, report: SyncReport },

  #[error("offline queue unavailable: {0}")]
  Queue(color_eyre::Report),
}

pub struct SyncCoordinator {
  queue: Arc<dyn OfflineQueue>,
  network: Arc<dyn Network>,
  orders_url: Url,
  cart_url: Url,
}

impl SyncCoordinator {
  pub fn new(
    queue: Arc<dyn OfflineQueue>,
    network: Arc<dyn Network>,
    orders_url: Url,
    cart_url: Url,
  ) -> Self {
    Self {
      queue,
      network,
      orders_url,
      cart_url,
    }
  }

  pub async fn run(&self, tag: SyncTag) -> Result<SyncReport, SyncError> {
    info!(%tag, "background sync");
    match tag {
      SyncTag::Orders => self.sync_orders().await,
      SyncTag::Cart => self.sync_cart().await,
    }
  }

  /// POST every queued order in enqueue order, removing each one the server
  /// accepts. A failure never stops the remaining orders.
  pub async fn sync_orders(&self) -> Result<SyncReport, SyncError> {
    let orders = self.queue.orders().map_err(SyncError::Queue)?;
    let mut report = SyncReport::default();

    for order in orders {
      report.attempted += 1;

      let body = match serde_json::to_vec(&order.payload) {
        Ok(body) => body,
        Err(e) => {
          error!(order = %order.id, error = %e, "failed to encode order");
          report.failed += 1;
          continue;
        }
      };

      let request = Request::post_json(self.orders_url.clone(), body);
      match self.network.fetch(&request).await {
        Ok(response) if response.ok() => match self.queue.remove_order(&order.id) {
          Ok(_) => {
            info!(order = %order.id, "order synced successfully");
            report.synced += 1;
          }
          Err(e) => {
            // Server has it, but it stays queued; a resend is the safer failure
            error!(order = %order.id, error = %e, "failed to dequeue synced order");
            report.failed += 1;
          }
        },
        Ok(response) => {
          warn!(order = %order.id, status = response.status, "order rejected by server");
          report.failed += 1;
        }
        Err(e) => {
          warn!(order = %order.id, error = %e, "failed to sync order");
          report.failed += 1;
        }
      }
    }

    finish(SyncTag::Orders, report)
  }

  /// POST the whole cart as one payload; clear it once accepted.
  pub async fn sync_cart(&self) -> Result<SyncReport, SyncError> {
    let cart = match self.queue.cart().map_err(SyncError::Queue)? {
      Some(cart) if !cart.is_empty() => cart,
      _ => return Ok(SyncReport::default()),
    };

    let mut report = SyncReport {
      attempted: 1,
      ..Default::default()
    };

    let body = serde_json::to_vec(&cart).map_err(|e| SyncError::Queue(e.into()))?;
    let request = Request::post_json(self.cart_url.clone(), body);

    match self.network.fetch(&request).await {
      Ok(response) if response.ok() => {
        self.queue.clear_cart().map_err(SyncError::Queue)?;
        info!(items = cart.items.len(), "cart synced successfully");
        report.synced = 1;
      }
      Ok(response) => {
        warn!(status = response.status, "cart rejected by server");
        report.failed = 1;
      }
      Err(e) => {
        warn!(error = %e, "error syncing cart");
        report.failed = 1;
      }
    }

    finish(SyncTag::Cart, report)
  }
}

fn finish(tag: SyncTag, report: SyncReport) -> Result<SyncReport, SyncError> {
  if report.failed > 0 {
    Err(SyncError::Incomplete { tag, report })
  } else {
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Response};
  use crate::queue::{MemoryOfflineQueue, OfflineCart};
  use crate::testing::ScriptedNetwork;
  use serde_json::json;

  const ORDERS: &str = "http://localhost/api/orders";
  const CART: &str = "http://localhost/api/cart/sync";

  fn coordinator() -> (
    Arc<MemoryOfflineQueue>,
    Arc<ScriptedNetwork>,
    SyncCoordinator,
  ) {
    let queue = Arc::new(MemoryOfflineQueue::new());
    let network = Arc::new(ScriptedNetwork::new());
    let sync = SyncCoordinator::new(
      queue.clone(),
      network.clone(),
      Url::parse(ORDERS).unwrap(),
      Url::parse(CART).unwrap(),
    );
    (queue, network, sync)
  }

  #[test]
  fn test_tags() {
    assert_eq!("order-sync".parse::<SyncTag>().unwrap(), SyncTag::Orders);
    assert_eq!("cart-sync".parse::<SyncTag>().unwrap(), SyncTag::Cart);
    assert!(matches!(
      "profile-sync".parse::<SyncTag>(),
      Err(SyncError::UnknownTag(_))
    ));
  }

  #[tokio::test]
  async fn test_failed_order_stays_queued_others_sync() {
    let (queue, network, sync) = coordinator();
    for id in ["o1", "o2", "o3"] {
      queue.enqueue_order(json!({"id": id})).unwrap();
    }
    network
      .respond(Method::Post, ORDERS, Response::new(201, Vec::new()))
      .fail(Method::Post, ORDERS)
      .respond(Method::Post, ORDERS, Response::new(201, Vec::new()));

    let err = sync.run(SyncTag::Orders).await.unwrap_err();

    match err {
      SyncError::Incomplete { tag, report } => {
        assert_eq!(tag, SyncTag::Orders);
        assert_eq!(
          report,
          SyncReport {
            attempted: 3,
            synced: 2,
            failed: 1
          }
        );
      }
      other => panic!("unexpected error {:?}", other),
    }

    let remaining: Vec<_> = queue.orders().unwrap().into_iter().map(|o| o.id).collect();
    assert_eq!(remaining, vec!["o2"]);

    let bodies: Vec<serde_json::Value> = network
      .calls()
      .iter()
      .map(|r| serde_json::from_slice(r.body.as_ref().unwrap()).unwrap())
      .collect();
    assert_eq!(bodies, vec![json!({"id": "o1"}), json!({"id": "o2"}), json!({"id": "o3"})]);
  }

  #[tokio::test]
  async fn test_rejected_order_is_kept() {
    let (queue, network, sync) = coordinator();
    queue.enqueue_order(json!({"id": "o1"})).unwrap();
    network.respond(Method::Post, ORDERS, Response::new(422, Vec::new()));

    assert!(sync.sync_orders().await.is_err());
    assert_eq!(queue.pending_orders().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_empty_order_queue_succeeds() {
    let (_queue, network, sync) = coordinator();
    assert_eq!(sync.sync_orders().await.unwrap(), SyncReport::default());
    assert_eq!(network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_empty_cart_never_hits_network() {
    let (queue, network, sync) = coordinator();
    assert_eq!(sync.sync_cart().await.unwrap(), SyncReport::default());

    queue.save_cart(&OfflineCart::default()).unwrap();
    assert_eq!(sync.sync_cart().await.unwrap(), SyncReport::default());

    assert_eq!(network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_cart_cleared_on_success() {
    let (queue, network, sync) = coordinator();
    queue
      .save_cart(&OfflineCart {
        items: vec![json!({"menu_item_id": 3, "quantity": 1})],
        ..Default::default()
      })
      .unwrap();
    network.respond(Method::Post, CART, Response::new(200, Vec::new()));

    let report = sync.run(SyncTag::Cart).await.unwrap();

    assert_eq!(report.synced, 1);
    assert!(queue.cart().unwrap().is_none());
    let call = &network.calls()[0];
    assert_eq!(call.header("content-type"), Some("application/json"));
  }

  #[tokio::test]
  async fn test_cart_kept_on_failure() {
    let (queue, network, sync) = coordinator();
    queue
      .save_cart(&OfflineCart {
        items: vec![json!({"menu_item_id": 3})],
        ..Default::default()
      })
      .unwrap();
    network.fail(Method::Post, CART);

    assert!(sync.sync_cart().await.is_err());
    assert!(queue.cart().unwrap().is_some());
  }
}
