//! Durable queue of mutations (orders, cart) made while offline.
//!
//! Kept apart from the response cache: entries are removed only once the
//! server has confirmed them.

mod storage;
mod types;

pub use storage::{MemoryOfflineQueue, OfflineQueue, SqliteOfflineQueue};
pub use types::{OfflineCart, OfflineOrder};
