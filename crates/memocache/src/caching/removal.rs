use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::cache::validate_segment;
use super::expiration::is_expired;
use super::fs::{CacheFile, catch_not_found};
use super::{Cache, CacheContents, CacheError};

/// Describes a cache file that is about to be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalCandidate {
    pub key: String,
    /// The file name, `{key}.{extension}`.
    pub filename: String,
    pub path: PathBuf,
    /// The modification time of the file, which is when its value was written.
    pub mtime: SystemTime,
    /// Whether the file is older than the cache's current default TTL.
    pub expired: bool,
}

/// Decides whether a [`RemovalCandidate`] should actually be removed.
///
/// This is implemented for all `Fn(&RemovalCandidate) -> bool` closures. Asynchronous or
/// fallible predicates are wrapped with [`predicate_fn`]. An error aborts the removal of the
/// candidate it was raised for.
///
/// Closures need an explicit parameter type to be accepted:
///
/// ```
/// use memocache::{FsRemoval, RemovalCandidate};
///
/// let options = FsRemoval::new().should_remove(|c: &RemovalCandidate| c.key.starts_with("tmp-"));
/// ```
pub trait RemovalPredicate: Send + Sync {
    fn should_remove<'a>(
        &'a self,
        candidate: &'a RemovalCandidate,
    ) -> BoxFuture<'a, anyhow::Result<bool>>;
}

impl<F> RemovalPredicate for F
where
    F: Fn(&RemovalCandidate) -> bool + Send + Sync,
{
    fn should_remove<'a>(
        &'a self,
        candidate: &'a RemovalCandidate,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        futures::future::ready(Ok(self(candidate))).boxed()
    }
}

struct AsyncPredicate<F>(F);

impl<F, Fut> RemovalPredicate for AsyncPredicate<F>
where
    F: Fn(RemovalCandidate) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    fn should_remove<'a>(
        &'a self,
        candidate: &'a RemovalCandidate,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        (self.0)(candidate.clone()).boxed()
    }
}

/// Creates a [`RemovalPredicate`] from an asynchronous, fallible function.
pub fn predicate_fn<F, Fut>(f: F) -> impl RemovalPredicate
where
    F: Fn(RemovalCandidate) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    AsyncPredicate(f)
}

/// Options for removals which start from the in-memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRemoval {
    /// Also delete the cache file of each removed entry. Defaults to `true`.
    pub include_fs: bool,
}

impl Default for MemoryRemoval {
    fn default() -> Self {
        Self { include_fs: true }
    }
}

impl MemoryRemoval {
    /// Only touches the in-memory tier.
    pub fn memory_only() -> Self {
        Self { include_fs: false }
    }
}

/// Options for removals which start from the file-system tier.
#[derive(Clone)]
pub struct FsRemoval {
    pub(super) include_memory: bool,
    pub(super) should_remove: Option<Arc<dyn RemovalPredicate>>,
    pub(super) extension: Option<String>,
}

impl Default for FsRemoval {
    fn default() -> Self {
        Self {
            include_memory: true,
            should_remove: None,
            extension: None,
        }
    }
}

impl fmt::Debug for FsRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsRemoval")
            .field("include_memory", &self.include_memory)
            .field("should_remove", &self.should_remove.is_some())
            .field("extension", &self.extension)
            .finish()
    }
}

impl FsRemoval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether to also drop the in-memory entry of each removed file. Defaults to `true`.
    pub fn include_memory(mut self, include_memory: bool) -> Self {
        self.include_memory = include_memory;
        self
    }

    /// Only removes files for which `predicate` agrees.
    pub fn should_remove(mut self, predicate: impl RemovalPredicate + 'static) -> Self {
        self.should_remove = Some(Arc::new(predicate));
        self
    }

    /// Targets files with this extension instead of the cache's default.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

impl Cache {
    /// Removes `key` from the in-memory tier, and with `include_fs` also its cache file.
    ///
    /// The file is looked up with the extension the value was written under. Returns whether
    /// anything was removed.
    pub async fn remove_from_memory(&self, key: &str, options: MemoryRemoval) -> CacheContents<bool> {
        validate_segment("key", key)?;
        self.remove_memory_entry(key, None, options.include_fs, false)
            .await
    }

    /// Removes the cache file of `key`, and with `include_memory` also its in-memory entry.
    ///
    /// A missing file is not an error, and leaves the in-memory tier untouched. If a
    /// [`should_remove`](FsRemoval::should_remove) predicate is given and declines, nothing is
    /// removed. Returns whether the file was removed.
    pub async fn remove_from_fs(&self, key: &str, options: FsRemoval) -> CacheContents<bool> {
        validate_segment("key", key)?;
        if let Some(extension) = &options.extension {
            validate_segment("extension", extension)?;
        }

        let file = self.cache_file(key, options.extension.as_deref());
        self.remove_file_entry(key, file, &options, false).await
    }

    /// Unconditionally removes `key` from both tiers.
    ///
    /// Without an explicit `extension`, the one the in-memory value was written under is used,
    /// falling back to the cache's default. Returns whether anything was removed.
    pub async fn remove(&self, key: &str, extension: Option<&str>) -> CacheContents<bool> {
        validate_segment("key", key)?;
        if let Some(extension) = extension {
            validate_segment("extension", extension)?;
        }
        self.remove_memory_entry(key, extension, true, false).await
    }

    /// Drops the in-memory entry of `key` and optionally its file.
    ///
    /// With `only_expired`, the entry is only dropped if its file exists and has expired.
    pub(super) async fn remove_memory_entry(
        &self,
        key: &str,
        extension: Option<&str>,
        include_fs: bool,
        only_expired: bool,
    ) -> CacheContents<bool> {
        let inner = &self.inner;
        let slot = inner.slots.get(key);
        let mut generation = slot.lock().await;

        let stored_extension = inner.memory.extension(key);
        let file = self.cache_file(key, extension.or(stored_extension.as_deref()));

        if only_expired {
            if stored_extension.is_none() {
                return Ok(false);
            }
            let Some(mtime) = catch_not_found(inner.storage.mtime(&file.path)).await? else {
                return Ok(false);
            };
            if !is_expired(mtime, inner.config.default_ttl, SystemTime::now()) {
                return Ok(false);
            }
        }

        *generation += 1;
        let mut removed = inner.memory.remove(key).is_some();
        if removed {
            tracing::debug!(key, "Removed entry from memory");
        }

        if include_fs {
            if catch_not_found(inner.storage.remove(&file.path))
                .await?
                .is_some()
            {
                tracing::debug!(path = %file.path.display(), "Removed cache file");
                removed = true;
            }
            inner.removals.cancel(key);
        }

        Ok(removed)
    }

    /// Runs the removal sequence for a single cache file.
    ///
    /// With `only_expired`, files younger than the default TTL are retained before the
    /// predicate is consulted.
    pub(super) async fn remove_file_entry(
        &self,
        key: &str,
        file: CacheFile,
        options: &FsRemoval,
        only_expired: bool,
    ) -> CacheContents<bool> {
        let inner = &self.inner;
        let slot = inner.slots.get(key);
        let mut generation = slot.lock().await;

        if !catch_not_found(inner.storage.exists(&file.path))
            .await?
            .unwrap_or(false)
        {
            return Ok(false);
        }
        let Some(mtime) = catch_not_found(inner.storage.mtime(&file.path)).await? else {
            return Ok(false);
        };

        let expired = is_expired(mtime, inner.config.default_ttl, SystemTime::now());
        if only_expired && !expired {
            return Ok(false);
        }

        let candidate = RemovalCandidate {
            key: key.to_owned(),
            filename: file.filename,
            path: file.path,
            mtime,
            expired,
        };

        if let Some(predicate) = &options.should_remove {
            let remove = predicate
                .should_remove(&candidate)
                .await
                .map_err(CacheError::predicate)?;
            if !remove {
                tracing::trace!(key, "Removal declined by predicate");
                return Ok(false);
            }
        }

        *generation += 1;
        catch_not_found(inner.storage.remove(&candidate.path)).await?;
        tracing::debug!(path = %candidate.path.display(), expired, "Removed cache file");

        if options.include_memory {
            inner.memory.remove(key);
            inner.removals.cancel(key);
        }

        Ok(true)
    }
}
