use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The result of a cache operation.
pub type CacheContents<T = String> = Result<T, CacheError>;

/// An error returned by [`Cache`](super::Cache) operations.
///
/// The error is cheaply clonable, as one outcome of a coalesced computation is handed out to
/// every caller waiting for it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The cache or a single request was configured with invalid options.
    ///
    /// This is raised before any I/O happens.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A file-system operation failed for another reason than the file not existing.
    #[error("storage error: {0}")]
    Storage(#[source] Arc<io::Error>),
    /// The producer of a value failed. Nothing was written to the cache.
    #[error("producer failed: {0:#}")]
    Producer(Arc<anyhow::Error>),
    /// A removal predicate failed, the affected entry was not removed.
    #[error("removal predicate failed: {0:#}")]
    Predicate(Arc<anyhow::Error>),
    /// A cached value could not be decoded.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The computation went away without producing a result, for example because the
    /// producer panicked.
    #[error("computation was interrupted")]
    Interrupted,
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Storage(Arc::new(err))
    }
}

impl CacheError {
    pub(super) fn producer(err: impl Into<anyhow::Error>) -> Self {
        Self::Producer(Arc::new(err.into()))
    }

    pub(super) fn predicate(err: anyhow::Error) -> Self {
        Self::Predicate(Arc::new(err))
    }

    /// Returns the underlying [`io::Error`] of a [`Storage`](Self::Storage) error.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}
