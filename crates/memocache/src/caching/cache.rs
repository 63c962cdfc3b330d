use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;

use super::expiration::is_expired;
use super::fs::{CacheFile, FsStorage, Storage, catch_not_found};
use super::memory::MemoryTier;
use super::pending::PendingRequests;
use super::slots::{KeySlots, Slot};
use super::timers::ScheduledRemovals;
use super::{CacheContents, CacheError};

/// A request for a single cached value, see [`Cache::compute_memoized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub(super) key: String,
    pub(super) ttl: Option<Duration>,
    pub(super) skip: bool,
    pub(super) schedule_removal: bool,
    pub(super) extension: Option<String>,
}

impl CacheRequest {
    /// Creates a request for `key` with the cache's default options.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: None,
            skip: false,
            schedule_removal: true,
            extension: None,
        }
    }

    /// Overrides the cache's default TTL for this entry.
    ///
    /// The TTL has to be non-zero and must not exceed [`CacheConfig::max_ttl`].
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Bypasses both tiers and always runs the producer.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Whether to remove the entry from both tiers once its TTL elapsed. Defaults to `true`.
    pub fn schedule_removal(mut self, schedule_removal: bool) -> Self {
        self.schedule_removal = schedule_removal;
        self
    }

    /// Overrides the cache's default file extension for this entry.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Rejects keys and extensions that would not map to a single file in the cache directory.
pub(super) fn validate_segment(kind: &str, segment: &str) -> Result<(), CacheError> {
    if segment.is_empty() {
        return Err(CacheError::Configuration(format!("{kind} must not be empty")));
    }
    if segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(CacheError::Configuration(format!(
            "{kind} `{segment}` must not contain path separators"
        )));
    }
    Ok(())
}

/// A memoizing cache with an in-memory and a file-system tier.
///
/// Values are produced by an asynchronous producer on a cache miss, written to
/// `{path}/{key}.{extension}` and optionally kept in memory. Concurrent requests for the same
/// key are coalesced onto a single run of the producer.
///
/// Freshness of files is judged by their `mtime`. In addition, every write schedules the
/// removal of the entry once its TTL elapsed.
///
/// The cache is cheap to clone, all clones share the same state.
#[derive(Clone)]
pub struct Cache {
    pub(super) inner: Arc<CacheInner>,
}

pub(super) struct CacheInner {
    pub(super) config: CacheConfig,
    pub(super) storage: Arc<dyn Storage>,
    pub(super) memory: MemoryTier,
    pub(super) pending: PendingRequests,
    pub(super) slots: KeySlots,
    pub(super) removals: ScheduledRemovals,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Cache")
            .field("config", &inner.config)
            .field("storage", &inner.storage)
            .field("in-memory items", &inner.memory.len())
            .field("running computations", &inner.pending.len())
            .field("scheduled removals", &inner.removals.len())
            .finish()
    }
}

impl Cache {
    /// Creates a cache on top of the local file system.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_storage(config, Arc::new(FsStorage))
    }

    /// Creates a cache on top of the given [`Storage`].
    ///
    /// Fails with [`CacheError::Configuration`] if the TTL bounds of `config` are invalid.
    pub fn with_storage(config: CacheConfig, storage: Arc<dyn Storage>) -> Result<Self, CacheError> {
        config.validate()?;
        validate_segment("extension", &config.extension)?;

        let memory = MemoryTier::new(config.keep_in_memory);
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                storage,
                memory,
                pending: Default::default(),
                slots: Default::default(),
                removals: Default::default(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The keys currently held by the in-memory tier.
    pub fn memory_keys(&self) -> Vec<String> {
        let mut keys = self.inner.memory.keys();
        keys.sort();
        keys
    }

    pub(super) fn cache_file(&self, key: &str, extension: Option<&str>) -> CacheFile {
        let extension = extension.unwrap_or(&self.inner.config.extension);
        CacheFile::new(&self.inner.config.path, key, extension)
    }

    /// Returns the cached value for the request, or produces, persists and returns a new one.
    ///
    /// Lookups go through the following steps:
    /// 1. A running computation for the same key is joined, regardless of its `producer`.
    /// 2. With [`skip`](CacheRequest::skip), the `producer` is run and nothing is cached.
    /// 3. The in-memory tier is consulted.
    /// 4. The cache file is read if its `mtime` is younger than the TTL. Expired files are
    ///    deleted.
    /// 5. Otherwise the `producer` is run, its value written to disk and memory, and a removal
    ///    is scheduled after the TTL.
    ///
    /// The computation runs as a separate task, so it completes and populates the cache even
    /// if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Invalid TTLs or keys are rejected with [`CacheError::Configuration`] before any I/O.
    /// Producer failures are returned as [`CacheError::Producer`] to every coalesced caller,
    /// and nothing is written in that case.
    pub async fn compute_memoized<F, Fut, E>(
        &self,
        request: CacheRequest,
        producer: F,
    ) -> CacheContents
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        validate_segment("key", &request.key)?;
        if let Some(extension) = &request.extension {
            validate_segment("extension", extension)?;
        }
        let ttl = self.inner.config.effective_ttl(request.ttl)?;

        metric!(counter("caches.access") += 1);

        let this = self.clone();
        let key = request.key.clone();
        let (result, spawned) = self.inner.pending.join_or_spawn(&key, move || async move {
            this.lookup_or_compute(request, ttl, producer).await
        });

        if !spawned {
            tracing::trace!(key = %key, "Joining running computation");
            metric!(counter("caches.coalesced") += 1);
        }
        result.await
    }

    /// Like [`compute_memoized`](Self::compute_memoized), storing the value as JSON.
    ///
    /// Values which fail to decode are reported as [`CacheError::Malformed`].
    pub async fn compute_memoized_json<T, F, Fut, E>(
        &self,
        request: CacheRequest,
        producer: F,
    ) -> CacheContents<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let json = self
            .compute_memoized(request, move || encode_json(producer()))
            .await?;

        serde_json::from_str(&json).map_err(|err| CacheError::Malformed(err.to_string()))
    }

    async fn lookup_or_compute<F, Fut, E>(
        &self,
        request: CacheRequest,
        ttl: Duration,
        producer: F,
    ) -> CacheContents
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Into<anyhow::Error>,
    {
        let inner = &self.inner;
        let key = request.key.as_str();

        if request.skip {
            tracing::trace!(key, "Bypassing cache tiers");
            return produce(producer).await;
        }

        if let Some(value) = inner.memory.get(key) {
            tracing::trace!(key, "Loading from memory");
            metric!(counter("caches.memory.hit") += 1);
            return Ok(value);
        }

        let slot = inner.slots.get(key);
        let generation = *slot.lock().await;
        let extension = request
            .extension
            .as_deref()
            .unwrap_or(&inner.config.extension);
        let file = CacheFile::new(&inner.config.path, key, extension);

        self.ensure_cache_dir().await?;

        if let Some(value) = self.lookup_file(&file, ttl, &slot).await? {
            tracing::trace!(key, path = %file.path.display(), "Loaded cache file");
            metric!(counter("caches.file.hit") += 1);

            let guard = slot.lock().await;
            if *guard == generation {
                inner.memory.insert(key, &value, extension);
            }
            return Ok(value);
        }

        metric!(counter("caches.file.miss") += 1);
        let value = produce(producer).await?;

        let guard = slot.lock().await;
        if *guard != generation {
            // a removal was issued while the producer was running, which takes precedence
            tracing::debug!(key, "Entry was removed during computation, not persisting");
            return Ok(value);
        }

        tracing::trace!(key, path = %file.path.display(), "Writing cache file");
        inner.storage.write(&file.path, &value).await?;
        metric!(counter("caches.file.write") += 1);
        metric!(time_raw("caches.file.size") = value.len() as u64);

        inner.memory.insert(key, &value, extension);
        if request.schedule_removal {
            self.schedule_removal(key, extension, ttl);
        } else {
            inner.removals.cancel(key);
        }
        drop(guard);

        Ok(value)
    }

    /// Creates the cache directory if it does not exist yet.
    async fn ensure_cache_dir(&self) -> CacheContents<()> {
        let storage = &self.inner.storage;
        let path = &self.inner.config.path;
        if !storage.exists(path).await? {
            tracing::debug!(path = %path.display(), "Creating cache directory");
            storage.create_dir_all(path).await?;
        }
        Ok(())
    }

    /// Reads `file` if it exists and is younger than `ttl`, deleting it if it expired.
    async fn lookup_file(
        &self,
        file: &CacheFile,
        ttl: Duration,
        slot: &Slot,
    ) -> CacheContents<Option<String>> {
        let storage = &self.inner.storage;

        // `NotFound` can be returned from every step in here, as a removal might run in
        // between. All of those are cache misses.
        if !catch_not_found(storage.exists(&file.path))
            .await?
            .unwrap_or(false)
        {
            return Ok(None);
        }
        let Some(mtime) = catch_not_found(storage.mtime(&file.path)).await? else {
            return Ok(None);
        };

        if is_expired(mtime, ttl, SystemTime::now()) {
            tracing::debug!(path = %file.path.display(), "Removing expired cache file");
            metric!(counter("caches.file.expired") += 1);

            let _guard = slot.lock().await;
            catch_not_found(storage.remove(&file.path)).await?;
            return Ok(None);
        }

        Ok(catch_not_found(storage.read(&file.path)).await?)
    }

    fn schedule_removal(&self, key: &str, extension: &str, ttl: Duration) {
        let cache = Arc::downgrade(&self.inner);
        let entry_key = key.to_owned();
        let extension = extension.to_owned();

        metric!(counter("caches.removal.scheduled") += 1);
        self.inner.removals.schedule(key, ttl, move |id| {
            let key = entry_key;
            async move {
                let Some(inner) = cache.upgrade() else {
                    return;
                };
                let cache = Cache { inner };
                if let Err(err) = cache.remove_scheduled(&key, &extension, id).await {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        key = %key,
                        "Failed to remove expired cache entry",
                    );
                }
            }
        });
    }

    /// Removes `key` from both tiers once its removal timer fired.
    ///
    /// This does not count as a manual removal, so computations running concurrently still
    /// persist their result afterwards. Nothing is removed if a write replaced or cancelled the
    /// timer while it waited for the lock.
    async fn remove_scheduled(&self, key: &str, extension: &str, id: u64) -> CacheContents<()> {
        let slot = self.inner.slots.get(key);
        let _guard = slot.lock().await;

        if !self.inner.removals.finish(key, id) {
            tracing::trace!(key, "Scheduled removal was superseded");
            return Ok(());
        }

        metric!(counter("caches.removal.fired") += 1);
        tracing::debug!(key, "Removing entry after its ttl elapsed");
        self.inner.memory.remove(key);
        let file = self.cache_file(key, Some(extension));
        catch_not_found(self.inner.storage.remove(&file.path)).await?;
        Ok(())
    }
}

/// Runs the producer, turning its error into a [`CacheError::Producer`].
async fn produce<F, Fut, E>(producer: F) -> CacheContents
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, E>>,
    E: Into<anyhow::Error>,
{
    metric!(counter("caches.computation") += 1);
    producer().await.map_err(CacheError::producer)
}

async fn encode_json<T, Fut, E>(value: Fut) -> anyhow::Result<String>
where
    T: Serialize,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let value = value.await.map_err(Into::<anyhow::Error>::into)?;
    Ok(serde_json::to_string(&value)?)
}
