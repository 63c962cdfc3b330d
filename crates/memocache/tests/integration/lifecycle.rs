use std::io::Write;
use std::time::Duration;

use memocache::{
    Cache, CacheError, CacheRequest, CleanupStats, Config, FsRemoval, RemovalCandidate,
};

use crate::{age_file, cache_file, list_files, setup_cache};

async fn produce(value: &str) -> anyhow::Result<String> {
    Ok(value.to_owned())
}

#[tokio::test]
async fn test_survives_restart() {
    let (cache, _tempdir) = setup_cache(|_| ());

    let value = cache
        .compute_memoized(CacheRequest::new("greeting"), || produce("hello"))
        .await
        .unwrap();
    assert_eq!(value, "hello");

    let restarted = Cache::new(cache.config().clone()).unwrap();
    let value = restarted
        .compute_memoized(CacheRequest::new("greeting"), || produce("goodbye"))
        .await
        .unwrap();
    assert_eq!(value, "hello");
}

#[tokio::test]
async fn test_expiry_across_restart() {
    let (cache, _tempdir) = setup_cache(|config| config.default_ttl = Duration::from_secs(60));

    cache
        .compute_memoized(CacheRequest::new("greeting"), || produce("hello"))
        .await
        .unwrap();
    age_file(cache_file(&cache, "greeting.tmp"), Duration::from_secs(61));

    let restarted = Cache::new(cache.config().clone()).unwrap();
    let value = restarted
        .compute_memoized(CacheRequest::new("greeting"), || produce("goodbye"))
        .await
        .unwrap();
    assert_eq!(value, "goodbye");
    assert_eq!(
        std::fs::read_to_string(cache_file(&cache, "greeting.tmp")).unwrap(),
        "goodbye"
    );
}

#[tokio::test]
async fn test_cache_from_config_file() {
    let tempdir = memocache_test::tempdir();
    let cache_dir = tempdir.path().join("from-config");

    let mut file = tempfile::NamedTempFile::new_in(tempdir.path()).unwrap();
    writeln!(
        file,
        "cache:\n  path: {}\n  default_ttl: 10m\n  max_ttl: 1h\n  extension: json",
        cache_dir.display()
    )
    .unwrap();

    let config = Config::get(Some(file.path())).unwrap();
    let cache = Cache::new(config.cache).unwrap();
    assert_eq!(cache.config().default_ttl, Duration::from_secs(600));

    let value: Vec<u32> = cache
        .compute_memoized_json(CacheRequest::new("numbers"), || async {
            Ok::<_, anyhow::Error>(vec![1, 2, 3])
        })
        .await
        .unwrap();
    assert_eq!(value, [1, 2, 3]);
    assert_eq!(list_files(&cache_dir), ["numbers.json"]);

    let err = cache
        .compute_memoized(
            CacheRequest::new("numbers").ttl(Duration::from_secs(7200)),
            || produce("[]"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Configuration(_)));
}

#[tokio::test]
async fn test_maintenance_after_restart() {
    let (cache, _tempdir) = setup_cache(|_| ());
    for key in ["a", "b", "c"] {
        cache
            .compute_memoized(CacheRequest::new(key), move || produce(key))
            .await
            .unwrap();
    }
    age_file(cache_file(&cache, "a.tmp"), Duration::from_secs(2 * 3600));

    // a fresh process only knows about the files
    let restarted = Cache::new(cache.config().clone()).unwrap();
    let stats = restarted.purge(None).await.unwrap();
    assert_eq!(stats.removed, 1);
    assert_eq!(list_files(&cache.config().path), ["b.tmp", "c.tmp"]);

    let stats = restarted
        .clean_fs(FsRemoval::new().should_remove(|candidate: &RemovalCandidate| {
            candidate.key != "c"
        }))
        .await
        .unwrap();
    assert_eq!(stats, CleanupStats { removed: 1, retained: 1 });
    assert_eq!(list_files(&cache.config().path), ["c.tmp"]);

    // the original instance still serves its memory until told otherwise
    let value = cache
        .compute_memoized(CacheRequest::new("b"), || produce("recomputed"))
        .await
        .unwrap();
    assert_eq!(value, "b");

    cache.clean(None).await.unwrap();
    assert!(list_files(&cache.config().path).is_empty());
    assert!(cache.memory_keys().is_empty());
}
