//! A memoizing cache with an in-memory and a file-system tier.
//!
//! The entry point is [`Cache`](caching::Cache). See the [`caching`] module docs for how a
//! request travels through the tiers.

#![warn(missing_debug_implementations)]

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod utils;

pub use caching::{
    Cache, CacheError, CacheRequest, CleanupStats, FsRemoval, MemoryRemoval, RemovalCandidate,
    RemovalPredicate, predicate_fn,
};
pub use config::{CacheConfig, Config};
