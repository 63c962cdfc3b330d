//! The memoizing cache.
//!
//! A value is looked up in the following places, in order:
//!
//! - The running computations. Concurrent requests for the same key are coalesced, and all of
//!   them receive the outcome of a single producer run.
//! - The in-memory tier, unless disabled via [`CacheConfig::keep_in_memory`].
//! - The cache file at `{path}/{key}.{extension}`, if its `mtime` is younger than the TTL.
//!   Expired files are deleted on the way.
//!
//! If none of them has a value, the producer is run and its value is written to a new cache
//! file and kept in memory. A removal of the entry is scheduled once the TTL elapsed. That
//! timer is an eager cleanup only, reads check the `mtime` independently.
//!
//! Errors other than a file or directory not existing are propagated to the caller. Bulk
//! removals continue with the remaining entries and report the first error at the end.
//!
//! [`CacheConfig::keep_in_memory`]: crate::config::CacheConfig::keep_in_memory

mod cache;
mod cache_error;
mod cleanup;
mod expiration;
mod fs;
mod memory;
mod pending;
mod removal;
mod slots;
mod timers;


pub use cache::{Cache, CacheRequest};
pub use cache_error::{CacheContents, CacheError};
pub use cleanup::CleanupStats;
pub use expiration::is_expired;
pub use fs::{CacheFile, FsStorage, Storage};
pub use removal::{FsRemoval, MemoryRemoval, RemovalCandidate, RemovalPredicate, predicate_fn};
