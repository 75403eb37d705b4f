//! Trailing-edge debounce as per-key cancellable tasks.
//!
//! Scheduling a key aborts whatever is pending for that key and starts a
//! new timer, so only the last change inside the window is processed.

use super::lock;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Pending {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    pending: HashMap<PathBuf, Pending>,
    next_token: u64,
    disposed: bool,
}

/// Per-path scheduler on a tokio runtime.
pub struct Debouncer {
    delay: Duration,
    runtime: Handle,
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new(delay: Duration, runtime: Handle) -> Self {
        Self {
            delay,
            runtime,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` once `key` has been quiet for the debounce delay.
    ///
    /// Replaces any task still pending for `key`. Does nothing after
    /// [`Debouncer::dispose`].
    pub fn schedule<F, Fut>(&self, key: PathBuf, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }

        if let Some(previous) = state.pending.remove(&key) {
            previous.handle.abort();
        }

        state.next_token += 1;
        let token = state.next_token;
        let shared = Arc::clone(&self.state);
        let delay = self.delay;
        let task_key = key.clone();

        // The lock is held until the entry is inserted, so the timer cannot
        // observe the map before its own entry exists.
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = lock(&shared);
                if state.disposed {
                    return;
                }
                match state.pending.get(&task_key) {
                    Some(p) if p.token == token => {
                        state.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            task().await;
        });

        state.pending.insert(key, Pending { token, handle });
    }

    /// Number of timers still waiting.
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Drop the pending timer for one key.
    pub fn cancel(&self, key: &PathBuf) -> bool {
        match lock(&self.state).pending.remove(key) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending timer.
    pub fn cancel_all(&self) {
        let mut state = lock(&self.state);
        for (_, p) in state.pending.drain() {
            p.handle.abort();
        }
    }

    /// Cancel everything and refuse further scheduling.
    pub fn dispose(&self) {
        lock(&self.state).disposed = true;
        self.cancel_all();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> impl FnOnce() -> std::future::Ready<()> {
        let log = Arc::clone(log);
        move || {
            log.lock().unwrap().push(value);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_change_in_window_runs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let debouncer = Debouncer::new(Duration::from_millis(500), Handle::current());
        let key = PathBuf::from("/ws/chatSessions/a.json");

        debouncer.schedule(key.clone(), push(&log, 1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.schedule(key.clone(), push(&log, 2));
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.schedule(key.clone(), push(&log, 3));
        assert_eq!(debouncer.pending(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*log.lock().unwrap(), vec![3]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_debounce_independently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let debouncer = Debouncer::new(Duration::from_millis(100), Handle::current());

        debouncer.schedule(PathBuf::from("a"), push(&log, 1));
        debouncer.schedule(PathBuf::from("b"), push(&log, 2));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_drops_pending_and_blocks_new_work() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let debouncer = Debouncer::new(Duration::from_millis(100), Handle::current());

        debouncer.schedule(PathBuf::from("a"), push(&log, 1));
        debouncer.dispose();
        debouncer.schedule(PathBuf::from("b"), push(&log, 2));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(log.lock().unwrap().is_empty());
        assert!(debouncer.is_disposed());
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let debouncer = Debouncer::new(Duration::from_millis(100), Handle::current());
        let key = PathBuf::from("a");

        debouncer.schedule(key.clone(), push(&log, 1));
        assert!(debouncer.cancel(&key));
        assert!(!debouncer.cancel(&key));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(log.lock().unwrap().is_empty());
    }
}
