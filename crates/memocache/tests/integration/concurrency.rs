use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use memocache::{CacheRequest, MemoryRemoval};

use crate::{age_file, cache_file, setup_cache};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalescing_across_tasks() {
    let (cache, _tempdir) = setup_cache(|_| ());
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                let key = format!("key-{}", i % 4);
                let value = key.clone();
                cache
                    .compute_memoized(CacheRequest::new(key), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, anyhow::Error>(value)
                    })
                    .await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let value = task.await.unwrap().unwrap();
        assert_eq!(value, format!("key-{}", i % 4));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.memory_keys(), ["key-0", "key-1", "key-2", "key-3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_wins_over_pending_write() {
    let (cache, _tempdir) = setup_cache(|_| ());
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();

    let computation = tokio::spawn({
        let cache = cache.clone();
        async move {
            cache
                .compute_memoized(CacheRequest::new("key"), move || async move {
                    started_tx.send(()).ok();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, anyhow::Error>("value".to_owned())
                })
                .await
        }
    });

    started_rx.await.unwrap();
    cache.remove("key", None).await.unwrap();

    assert_eq!(computation.await.unwrap().unwrap(), "value");
    assert!(!cache_file(&cache, "key.tmp").exists());

    // a request after the removal computes and persists again
    let value = cache
        .compute_memoized(CacheRequest::new("key"), || async {
            Ok::<_, anyhow::Error>("fresh".to_owned())
        })
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert!(cache_file(&cache, "key.tmp").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rewrite_supersedes_scheduled_removal() {
    let (cache, _tempdir) = setup_cache(|_| ());

    cache
        .compute_memoized(
            CacheRequest::new("key").ttl(Duration::from_millis(100)),
            || async { Ok::<_, anyhow::Error>("short".to_owned()) },
        )
        .await
        .unwrap();

    // make the next lookup miss both tiers without cancelling the timer
    cache
        .remove_from_memory("key", MemoryRemoval::memory_only())
        .await
        .unwrap();
    age_file(cache_file(&cache, "key.tmp"), Duration::from_secs(120));

    let value = cache
        .compute_memoized(
            CacheRequest::new("key").ttl(Duration::from_secs(60)),
            || async { Ok::<_, anyhow::Error>("long".to_owned()) },
        )
        .await
        .unwrap();
    assert_eq!(value, "long");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.memory_keys(), ["key"]);
    assert!(cache_file(&cache, "key.tmp").exists());
}
