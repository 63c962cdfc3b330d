use std::path::PathBuf;

use memocache::{Cache, CacheConfig};
use memocache_test as test;

pub use test::{age_file, list_files};

/// Setup tests and create a cache in a temporary directory.
///
/// The directory is cleaned up when the returned [`TempDir`](test::TempDir) is dropped. Keep it
/// as guard until the test has finished. The `update_config` closure can modify the default
/// configuration before the cache is created.
pub fn setup_cache(update_config: impl FnOnce(&mut CacheConfig)) -> (Cache, test::TempDir) {
    test::setup();

    let tempdir = test::tempdir();
    let mut config = CacheConfig {
        path: tempdir.path().join("cache"),
        ..Default::default()
    };
    update_config(&mut config);

    (Cache::new(config).unwrap(), tempdir)
}

pub fn cache_file(cache: &Cache, name: &str) -> PathBuf {
    cache.config().path.join(name)
}
