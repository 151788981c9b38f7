//! Offline cache and background sync agent for the Time2Eat web app.
//!
//! The agent sits between a client and the application server:
//! - precaches a manifest of static assets at install time
//! - serves GET requests cache-first, copying selected dynamic routes into a
//!   dynamic partition and falling back to offline assets when the network
//!   is down
//! - keeps orders and the cart made while offline in a durable queue and
//!   flushes them when the host fires a deferred sync
//! - turns push payloads into notifications
//!
//! Every platform facility (cache storage, network, offline queue, windows,
//! notifications) is injected, so the agent runs the same against SQLite and
//! reqwest as it does against in-memory fakes.

pub mod agent;
pub mod cache;
pub mod config;
pub mod db;
pub mod fetch;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod push;
pub mod queue;
pub mod sync;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentStatus, Capabilities, Event, EventOutcome};
pub use config::Config;
