use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};

use crate::utils::defer::defer;

use super::{CacheContents, CacheError};

type ComputationChannel = Shared<oneshot::Receiver<CacheContents>>;

/// The table of in-flight computations, keyed by cache key.
///
/// Each computation is spawned as its own task, so it runs to completion even if every caller
/// stops waiting for it.
#[derive(Debug, Clone, Default)]
pub(super) struct PendingRequests {
    computations: Arc<Mutex<HashMap<String, ComputationChannel>>>,
}

impl PendingRequests {
    /// Joins the running computation for `key`, or spawns the one created by `computation`.
    ///
    /// Returns the shared result together with a flag telling whether a new computation was
    /// spawned. `computation` is only invoked in the latter case.
    pub fn join_or_spawn<F, Fut>(
        &self,
        key: &str,
        computation: F,
    ) -> (BoxFuture<'static, CacheContents>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents> + Send + 'static,
    {
        let mut computations = self.computations.lock().unwrap();
        if let Some(channel) = computations.get(key) {
            return (Self::into_result(channel.clone()), false);
        }

        let (sender, receiver) = oneshot::channel();
        let remove_computation_token = {
            let computations = Arc::clone(&self.computations);
            let key = key.to_owned();
            defer(move || {
                computations.lock().unwrap().remove(&key);
            })
        };

        let computation = computation();
        tokio::spawn(async move {
            let result = computation.await;
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_computation_token);
            sender.send(result).ok();
        });

        let channel = receiver.shared();
        let evicted = computations.insert(key.to_owned(), channel.clone());
        debug_assert!(evicted.is_none());

        (Self::into_result(channel), true)
    }

    fn into_result(channel: ComputationChannel) -> BoxFuture<'static, CacheContents> {
        channel
            .map(|result| result.unwrap_or(Err(CacheError::Interrupted)))
            .boxed()
    }

    pub fn len(&self) -> usize {
        self.computations.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_joins_running_computation() {
        let pending = PendingRequests::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let spawn = || {
            let calls = Arc::clone(&calls);
            pending.join_or_spawn("key", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("value".to_owned())
            })
        };

        let (first, spawned_first) = spawn();
        let (second, spawned_second) = spawn();
        assert!(spawned_first);
        assert!(!spawned_second);
        assert_eq!(pending.len(), 1);

        let (first, second) = futures::join!(first, second);
        assert_eq!(first.unwrap(), "value");
        assert_eq!(second.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pending.len(), 0);
    }

    fn explode() -> CacheContents {
        panic!("producer panicked")
    }

    #[tokio::test]
    async fn test_panicking_computation_is_interrupted() {
        let pending = PendingRequests::default();

        let (result, _) = pending.join_or_spawn("key", || async { explode() });

        assert!(matches!(result.await, Err(CacheError::Interrupted)));
        assert_eq!(pending.len(), 0);
    }
}
