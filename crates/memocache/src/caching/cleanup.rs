use std::ops::AddAssign;

use super::cache::validate_segment;
use super::fs::{CacheFile, catch_not_found, key_from_filename};
use super::{Cache, CacheContents, CacheError, FsRemoval, MemoryRemoval};

/// What a bulk removal did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    /// Entries which were removed from at least one tier.
    pub removed: usize,
    /// Entries which were left alone, because they were fresh, declined by a predicate or
    /// failed to be removed.
    pub retained: usize,
}

impl CleanupStats {
    fn record(&mut self, removed: bool) {
        if removed {
            self.removed += 1;
        } else {
            self.retained += 1;
        }
    }
}

impl AddAssign for CleanupStats {
    fn add_assign(&mut self, other: Self) {
        self.removed += other.removed;
        self.retained += other.retained;
    }
}

/// Collects the outcomes of independent removals.
///
/// A failing entry does not stop the sweep, but the first error is reported at the end.
#[derive(Debug, Default)]
struct Sweep {
    stats: CleanupStats,
    first_error: Option<CacheError>,
}

impl Sweep {
    fn record(&mut self, key: &str, result: CacheContents<bool>) {
        match result {
            Ok(removed) => self.stats.record(removed),
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    key,
                    "Failed to remove cache entry",
                );
                self.stats.retained += 1;
                self.first_error.get_or_insert(err);
            }
        }
    }

    fn finish(self, name: &str) -> CacheContents<CleanupStats> {
        let Self { stats, first_error } = self;
        tracing::info!(
            "{name} complete: removed {} and retained {} entries",
            stats.removed,
            stats.retained,
        );
        metric!(counter("caches.cleanup.files_removed") += stats.removed as i64, "op" => name);
        metric!(counter("caches.cleanup.files_retained") += stats.retained as i64, "op" => name);

        match first_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

impl Cache {
    /// Removes every entry held in memory, regardless of its age.
    ///
    /// With `include_fs`, the cache files of those entries are removed as well.
    pub async fn clean_memory(&self, options: MemoryRemoval) -> CacheContents<CleanupStats> {
        self.sweep_memory(options, false).await
    }

    /// Removes every cache file with the configured or given extension, regardless of its age.
    ///
    /// Each file passes through the same steps as [`remove_from_fs`](Self::remove_from_fs). A
    /// missing cache directory counts as empty.
    pub async fn clean_fs(&self, options: FsRemoval) -> CacheContents<CleanupStats> {
        self.sweep_fs(options, false).await
    }

    /// Wipes both tiers.
    pub async fn clean(&self, extension: Option<&str>) -> CacheContents<CleanupStats> {
        let memory = self.clean_memory(MemoryRemoval::default()).await;
        let fs = self.clean_fs(fs_removal(extension)).await;
        combine(memory, fs)
    }

    /// Removes entries held in memory whose cache file has expired.
    ///
    /// Memory does not track the age of values, so the `mtime` of the cache file decides.
    /// Entries without a cache file are retained.
    pub async fn purge_memory(&self, options: MemoryRemoval) -> CacheContents<CleanupStats> {
        self.sweep_memory(options, true).await
    }

    /// Removes cache files which are older than the current default TTL.
    pub async fn purge_fs(&self, options: FsRemoval) -> CacheContents<CleanupStats> {
        self.sweep_fs(options, true).await
    }

    /// Removes expired entries from both tiers.
    pub async fn purge(&self, extension: Option<&str>) -> CacheContents<CleanupStats> {
        let memory = self.purge_memory(MemoryRemoval::default()).await;
        let fs = self.purge_fs(fs_removal(extension)).await;
        combine(memory, fs)
    }

    async fn sweep_memory(
        &self,
        options: MemoryRemoval,
        only_expired: bool,
    ) -> CacheContents<CleanupStats> {
        let name = if only_expired { "purge_memory" } else { "clean_memory" };
        tracing::debug!("Running {name}");

        let mut sweep = Sweep::default();
        for key in self.inner.memory.keys() {
            let result = self
                .remove_memory_entry(&key, None, options.include_fs, only_expired)
                .await;
            sweep.record(&key, result);
        }
        sweep.finish(name)
    }

    async fn sweep_fs(&self, options: FsRemoval, only_expired: bool) -> CacheContents<CleanupStats> {
        let name = if only_expired { "purge_fs" } else { "clean_fs" };
        if let Some(extension) = &options.extension {
            validate_segment("extension", extension)?;
        }

        let config = &self.inner.config;
        let extension = options.extension.as_deref().unwrap_or(&config.extension);
        tracing::debug!(path = %config.path.display(), extension, "Running {name}");

        let Some(filenames) = catch_not_found(self.inner.storage.read_dir(&config.path)).await?
        else {
            tracing::debug!(path = %config.path.display(), "Cache directory does not exist");
            return Ok(CleanupStats::default());
        };

        let mut sweep = Sweep::default();
        for filename in &filenames {
            let Some(key) = key_from_filename(filename, extension) else {
                continue;
            };
            let file = CacheFile::new(&config.path, key, extension);
            let result = self.remove_file_entry(key, file, &options, only_expired).await;
            sweep.record(key, result);
        }
        sweep.finish(name)
    }
}

fn fs_removal(extension: Option<&str>) -> FsRemoval {
    match extension {
        Some(extension) => FsRemoval::new().extension(extension),
        None => FsRemoval::new(),
    }
}

/// Merges the outcomes of the memory and file-system sweeps of one operation.
fn combine(
    memory: CacheContents<CleanupStats>,
    fs: CacheContents<CleanupStats>,
) -> CacheContents<CleanupStats> {
    let mut stats = memory?;
    stats += fs?;
    Ok(stats)
}
