//! Versioned response cache with offline-first fetch strategies.
//!
//! This module provides:
//! - Three logical partitions (static, dynamic, image) named per generation
//! - SQLite-backed storage of response snapshots keyed by method + URL
//! - Cache-first, network-first and stale-while-revalidate strategies

mod key;
mod layer;
mod outcome;
mod registry;
mod storage;

pub use key::RequestKey;
pub use layer::CacheLayer;
pub use outcome::{CacheResult, CacheSource};
pub use registry::{Generations, PartitionKind};
pub use storage::{CacheStorage, SqliteStorage};

#[cfg(test)]
pub use storage::CachedEntry;
