//! Live change notification shared by all scanners.
//!
//! A scanner owns one [`WatchHub`]. The first `start` creates the filesystem
//! watcher and a debouncer; later calls only add callbacks. Changed paths are
//! debounced per file, re-parsed by the scanner's handler, and the parsed
//! value is dispatched to every registered callback.

mod debounce;
mod observers;
mod watcher;

pub use debounce::Debouncer;
pub use observers::{Callback, ObserverId, ObserverRegistry};
pub use watcher::{path_matches, FileWatcher};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Parses a changed file. `None` means "not readable yet", which is retried.
pub type FileHandler<T> = Arc<dyn Fn(&Path) -> Option<T> + Send + Sync>;

/// What to watch and how eagerly.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub roots: Vec<PathBuf>,
    /// Matched against absolute paths, e.g. `**/chatSessions/*.json`
    pub pattern: glob::Pattern,
    pub debounce: Duration,
    /// Extra attempts after a handler returns `None`
    pub max_retries: u32,
}

struct ActiveWatch {
    _watcher: FileWatcher,
    tx: UnboundedSender<PathBuf>,
    pump: JoinHandle<()>,
    debouncer: Arc<Debouncer>,
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.debouncer.dispose();
        self.pump.abort();
    }
}

/// One watcher fanned out to any number of callbacks.
pub struct WatchHub<T> {
    observers: ObserverRegistry<T>,
    active: Mutex<Option<ActiveWatch>>,
}

impl<T> Default for WatchHub<T> {
    fn default() -> Self {
        Self {
            observers: ObserverRegistry::new(),
            active: Mutex::new(None),
        }
    }
}

impl<T: Send + Sync + 'static> WatchHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`, starting the watcher if this is the first one.
    ///
    /// Must be called from within a tokio runtime. On error nothing is
    /// registered.
    pub fn start(
        &self,
        spec: &WatchSpec,
        handler: FileHandler<T>,
        callback: Callback<T>,
    ) -> Result<ObserverId> {
        let mut active = lock(&self.active);
        if active.is_none() {
            let runtime = Handle::try_current().map_err(|_| {
                Error::Watch("real-time updates need a running tokio runtime".to_string())
            })?;
            let (tx, rx) = mpsc::unbounded_channel();
            let watcher = FileWatcher::start(&spec.roots, spec.pattern.clone(), tx.clone())?;
            let debouncer = Arc::new(Debouncer::new(spec.debounce, runtime.clone()));
            let pump = runtime.spawn(pump(
                rx,
                Arc::clone(&debouncer),
                handler,
                self.observers.clone(),
                spec.max_retries,
            ));
            *active = Some(ActiveWatch {
                _watcher: watcher,
                tx,
                pump,
                debouncer,
            });
        }
        Ok(self.observers.add(callback))
    }

    /// Remove one callback. The watcher keeps running.
    pub fn remove(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Drop all callbacks, pending timers and the watcher.
    pub fn stop(&self) {
        self.observers.clear();
        if lock(&self.active).take().is_some() {
            tracing::debug!("Watcher stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Feed a change notification from outside (e.g. a host's own watcher).
    ///
    /// Returns `false` when not watching.
    pub fn notify_changed(&self, path: PathBuf) -> bool {
        match lock(&self.active).as_ref() {
            Some(active) => active.tx.send(path).is_ok(),
            None => false,
        }
    }
}

async fn pump<T: Send + Sync + 'static>(
    mut rx: UnboundedReceiver<PathBuf>,
    debouncer: Arc<Debouncer>,
    handler: FileHandler<T>,
    observers: ObserverRegistry<T>,
    max_retries: u32,
) {
    while let Some(path) = rx.recv().await {
        schedule_parse(
            &debouncer,
            path,
            0,
            Arc::clone(&handler),
            observers.clone(),
            max_retries,
        );
    }
}

fn schedule_parse<T: Send + Sync + 'static>(
    debouncer: &Arc<Debouncer>,
    path: PathBuf,
    attempt: u32,
    handler: FileHandler<T>,
    observers: ObserverRegistry<T>,
    max_retries: u32,
) {
    let again = Arc::clone(debouncer);
    let key = path.clone();
    debouncer.schedule(key, move || async move {
        match handler(&path) {
            Some(value) => {
                observers.dispatch(&value);
            }
            None if attempt < max_retries => {
                tracing::debug!(path = %path.display(), attempt, "Changed file not readable yet, retrying");
                schedule_parse(&again, path, attempt + 1, handler, observers, max_retries);
            }
            None => {
                tracing::warn!(path = %path.display(), attempts = attempt + 1, "Giving up on changed file");
            }
        }
    });
}
