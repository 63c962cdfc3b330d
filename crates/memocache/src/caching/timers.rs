use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::AbortHandle;

/// The timers of all scheduled removals, at most one per key.
///
/// Dropping the registry aborts all timers which did not fire yet.
#[derive(Debug, Default)]
pub(super) struct ScheduledRemovals {
    timers: Mutex<HashMap<String, (u64, AbortHandle)>>,
    next_id: AtomicU64,
}

impl ScheduledRemovals {
    /// Runs the future created by `removal` after `delay`.
    ///
    /// A timer already registered for `key` is aborted. `removal` receives the id of the new
    /// timer, which is to be passed to [`finish`](Self::finish) once it fires.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, removal: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let removal = removal(id);

        // hold the lock while spawning, so a fired timer can not `finish` before it is registered
        let mut timers = self.timers.lock().unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            removal.await;
        })
        .abort_handle();

        if let Some((_, previous)) = timers.insert(key.to_owned(), (id, handle)) {
            previous.abort();
        }
    }

    /// Aborts the timer of `key`, returning whether there was one.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().unwrap().remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Unregisters the fired timer `id` of `key`.
    ///
    /// Returns `false` if the timer has been cancelled or superseded by a newer one in the
    /// meantime, in which case the removal must not happen.
    pub fn finish(&self, key: &str, id: u64) -> bool {
        let mut timers = self.timers.lock().unwrap();
        if timers.get(key).is_some_and(|(current, _)| *current == id) {
            timers.remove(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl Drop for ScheduledRemovals {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_newer_timer_supersedes_older() {
        let removals = Arc::new(ScheduledRemovals::default());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            let registry = Arc::clone(&removals);
            removals.schedule("key", Duration::from_millis(20), move |id| async move {
                if registry.finish("key", id) {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(removals.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(removals.len(), 0);
    }

    #[tokio::test]
    async fn test_cancel() {
        let removals = ScheduledRemovals::default();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        removals.schedule("key", Duration::from_millis(20), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(removals.cancel("key"));
        assert!(!removals.cancel("key"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finish_after_reschedule() {
        let removals = ScheduledRemovals::default();
        let last_id = |removals: &ScheduledRemovals| removals.next_id.load(Ordering::Relaxed) - 1;

        removals.schedule("key", Duration::from_secs(60), |_| async {});
        let first = last_id(&removals);
        removals.schedule("key", Duration::from_secs(60), |_| async {});
        let second = last_id(&removals);

        // a timer which fired while being replaced must not remove the entry
        assert!(!removals.finish("key", first));
        assert_eq!(removals.len(), 1);
        assert!(removals.finish("key", second));
        assert!(!removals.finish("key", second));
        assert_eq!(removals.len(), 0);

        removals.schedule("key", Duration::from_secs(60), |_| async {});
        let cancelled = last_id(&removals);
        assert!(removals.cancel("key"));
        assert!(!removals.finish("key", cancelled));
    }
}
