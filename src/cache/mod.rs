//! Response cache organised in named, versioned partitions.
//!
//! This module provides:
//! - A storage-agnostic `CacheStore` trait (partitions of GET request → response)
//! - SQLite and in-memory backends
//! - A `CacheLayer` that knows the current static/dynamic partition names and
//!   prunes older generations on activation

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, CacheNames};
pub use storage::{MemoryCacheStore, SqliteCacheStore};
pub use traits::{CacheStore, CachedResponse};
