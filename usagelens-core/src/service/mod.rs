//! Unified session data service
//!
//! Owns the three scanners and the merged [`EventStore`], and is the only
//! place the event collection changes.
//!
//! ## Lifecycle
//!
//! 1. [`UnifiedSessionDataService::new`] builds scanners from config and, if
//!    enabled and a tokio runtime is running, starts watchers.
//! 2. [`UnifiedSessionDataService::initialize`] runs the first full scan.
//!    Queries before that return [`Error::NotInitialized`].
//! 3. Watcher callbacks re-parse one file and merge it into the store;
//!    subscribers get the affected events.
//! 4. [`UnifiedSessionDataService::dispose`] (or drop) stops everything;
//!    late callbacks become no-ops.

mod store;

pub use store::{log_event, log_event_id, EditCorrelation, EventStore, EventsDelta};

use crate::analytics::AnalyticsService;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::{
    ChatSessionScanResult, ChatSessionScanner, EditStateScan, EditStateScanner, LogFileUpdate,
    LogScan, LogScanner,
};
use crate::types::{
    CopilotUsageEvent, EditStateScanResult, EditStateSessionRequests, HostIdentity, LogEntry,
    ScanStats,
};
use crate::watch::{lock, Callback, ObserverId, ObserverRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

/// Whether an update replaces everything or patches part of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    FullScan,
    Incremental,
}

/// Payload of `on_session_events_updated`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEventsUpdate {
    pub kind: UpdateKind,
    /// For [`UpdateKind::FullScan`], the whole collection
    pub events: Vec<CopilotUsageEvent>,
    /// Ids no longer present
    pub removed: Vec<String>,
}

/// Counters from the last full scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedScanStats {
    pub sessions: ScanStats,
    pub edit_state: ScanStats,
    pub logs: ScanStats,
    pub total_events: usize,
    pub events_in_edit: usize,
    pub log_only_events: usize,
    /// Sources that failed and contributed nothing this pass
    pub degraded_sources: Vec<String>,
    pub scan_duration_ms: u64,
}

/// Result of [`UnifiedSessionDataService::scan_all_data`]
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub session_events: Vec<CopilotUsageEvent>,
    pub stats: UnifiedScanStats,
}

/// Which sources got a live watcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeStatus {
    pub sessions: bool,
    pub edit_state: bool,
    pub logs: bool,
}

impl RealTimeStatus {
    pub fn any(&self) -> bool {
        self.sessions || self.edit_state || self.logs
    }
}

/// Everything the service knows, as plain data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub exported_at: DateTime<Utc>,
    pub tool_version: String,
    pub stats: Option<UnifiedScanStats>,
    pub events: Vec<CopilotUsageEvent>,
    pub log_entries: Vec<LogEntry>,
    pub edit_sessions: Vec<EditStateSessionRequests>,
}

#[derive(Default)]
struct ServiceState {
    initialized: bool,
    store: EventStore,
    last_stats: Option<UnifiedScanStats>,
}

struct ServiceInner {
    host: HostIdentity,
    watch_enabled: bool,
    chat: ChatSessionScanner,
    edit: EditStateScanner,
    logs: LogScanner,
    state: Mutex<ServiceState>,
    init_lock: Mutex<()>,
    session_observers: ObserverRegistry<SessionEventsUpdate>,
    log_observers: ObserverRegistry<Vec<LogEntry>>,
    bound_analytics: Mutex<Vec<Arc<RwLock<AnalyticsService>>>>,
    disposed: AtomicBool,
}

/// Merges chat sessions, edit-state timelines and request logs into one
/// deduplicated event collection.
pub struct UnifiedSessionDataService {
    inner: Arc<ServiceInner>,
}

impl UnifiedSessionDataService {
    /// Build the service from config, starting watchers if enabled.
    pub fn new(config: &Config) -> Self {
        let watch = &config.watch;
        let storage_roots = config.sources.resolved_storage_roots();
        let log_roots = config.sources.resolved_log_roots();
        tracing::debug!(storage_roots = ?storage_roots, log_roots = ?log_roots, "Resolved roots");

        let inner = ServiceInner {
            host: HostIdentity::new(config.host.session_id.clone()),
            watch_enabled: watch.enabled,
            chat: ChatSessionScanner::new(storage_roots.clone())
                .with_watch_settings(watch.session_debounce(), watch.max_retries),
            edit: EditStateScanner::new(storage_roots)
                .with_watch_settings(watch.edit_state_debounce(), watch.max_retries),
            logs: LogScanner::new(log_roots)
                .with_watch_settings(watch.log_debounce(), watch.max_retries),
            state: Mutex::new(ServiceState::default()),
            init_lock: Mutex::new(()),
            session_observers: ObserverRegistry::new(),
            log_observers: ObserverRegistry::new(),
            bound_analytics: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        };
        let service = Self {
            inner: Arc::new(inner),
        };

        if service.inner.watch_enabled {
            service.start_real_time_updates();
        }
        service
    }

    pub fn host(&self) -> &HostIdentity {
        &self.inner.host
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.state).initialized
    }

    /// Run the first full scan if it has not happened yet.
    ///
    /// Concurrent callers wait for the one scan in flight.
    pub fn initialize(&self) -> Result<()> {
        self.ensure_live()?;
        let _guard = lock(&self.inner.init_lock);
        if self.is_initialized() {
            return Ok(());
        }
        self.scan_all_data().map(|_| ())
    }

    /// Full scan of all three sources, replacing the collection.
    ///
    /// A failing edit-state or log source degrades to empty for this pass.
    /// Only a missing set of storage roots fails the call.
    pub fn scan_all_data(&self) -> Result<ScanOutcome> {
        self.full_scan(|| {})
    }

    /// Read every source and rebuild the store under one hold of the state
    /// lock. Watcher updates that arrive meanwhile block until the rebuild
    /// is committed and then merge on top of it. `before_merge` runs with
    /// the lock held, after all sources were read.
    fn full_scan(&self, before_merge: impl FnOnce()) -> Result<ScanOutcome> {
        self.ensure_live()?;
        let started = Instant::now();
        let inner = &self.inner;

        let mut state = lock(&inner.state);
        let chat = inner.chat.scan_all()?;
        let mut degraded = Vec::new();
        let edit = inner.edit.scan_all().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Edit-state scan failed, continuing without it");
            degraded.push("edit-state".to_string());
            EditStateScan::default()
        });
        let logs = inner.logs.scan_all().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Log scan failed, continuing without it");
            degraded.push("logs".to_string());
            LogScan::default()
        });

        let chat_events: Vec<CopilotUsageEvent> = chat
            .results
            .iter()
            .flat_map(|r| r.to_events(&inner.host))
            .collect();

        before_merge();
        state.store.rebuild(
            chat_events,
            edit.session_requests,
            logs.entries.clone(),
            &inner.host,
        );
        let events = state.store.sorted_events();
        let stats = UnifiedScanStats {
            sessions: chat.stats,
            edit_state: edit.stats,
            logs: logs.stats,
            total_events: events.len(),
            events_in_edit: events.iter().filter(|e| e.is_in_edit).count(),
            log_only_events: events.iter().filter(|e| e.workspace_id.is_none()).count(),
            degraded_sources: degraded,
            scan_duration_ms: started.elapsed().as_millis() as u64,
        };
        state.initialized = true;
        state.last_stats = Some(stats.clone());
        drop(state);

        tracing::info!(
            events = stats.total_events,
            in_edit = stats.events_in_edit,
            log_only = stats.log_only_events,
            degraded = ?stats.degraded_sources,
            duration_ms = stats.scan_duration_ms,
            "Full scan merged"
        );

        inner.session_observers.dispatch(&SessionEventsUpdate {
            kind: UpdateKind::FullScan,
            events: events.clone(),
            removed: Vec::new(),
        });
        if !logs.entries.is_empty() {
            inner.log_observers.dispatch(&logs.entries);
        }

        Ok(ScanOutcome {
            session_events: events,
            stats,
        })
    }

    /// The merged collection, sorted by timestamp.
    pub fn session_events(&self) -> Result<Vec<CopilotUsageEvent>> {
        self.ensure_live()?;
        let state = lock(&self.inner.state);
        if !state.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(state.store.sorted_events())
    }

    /// Every log entry read so far, in read order.
    pub fn log_entries(&self) -> Result<Vec<LogEntry>> {
        self.ensure_live()?;
        let state = lock(&self.inner.state);
        if !state.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(state.store.log_entries().to_vec())
    }

    pub fn edit_state_sessions(&self) -> Result<Vec<EditStateSessionRequests>> {
        self.ensure_live()?;
        let state = lock(&self.inner.state);
        if !state.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(state.store.edit_sessions())
    }

    pub fn last_scan_stats(&self) -> Option<UnifiedScanStats> {
        lock(&self.inner.state).last_stats.clone()
    }

    pub fn on_session_events_updated(&self, callback: Callback<SessionEventsUpdate>) -> ObserverId {
        self.inner.session_observers.add(callback)
    }

    pub fn remove_session_events_callback(&self, id: ObserverId) -> bool {
        self.inner.session_observers.remove(id)
    }

    pub fn on_log_entries_updated(&self, callback: Callback<Vec<LogEntry>>) -> ObserverId {
        self.inner.log_observers.add(callback)
    }

    pub fn remove_log_entries_callback(&self, id: ObserverId) -> bool {
        self.inner.log_observers.remove(id)
    }

    /// Start watchers on every source. A source whose watcher cannot start
    /// stays pull-only; the rest are unaffected.
    pub fn start_real_time_updates(&self) -> RealTimeStatus {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return RealTimeStatus::default();
        }
        let weak = Arc::downgrade(&self.inner);

        let sessions = report(
            "sessions",
            self.inner
                .chat
                .start_watching(forward(&weak, ServiceInner::on_chat_changed)),
        );
        let edit_state = report(
            "edit-state",
            self.inner
                .edit
                .start_watching(forward(&weak, ServiceInner::on_edit_state_changed)),
        );
        let logs = report(
            "logs",
            self.inner
                .logs
                .start_watching(forward(&weak, ServiceInner::on_log_changed)),
        );

        RealTimeStatus {
            sessions,
            edit_state,
            logs,
        }
    }

    pub fn stop_real_time_updates(&self) {
        self.inner.chat.stop_watching();
        self.inner.edit.stop_watching();
        self.inner.logs.stop_watching();
    }

    pub fn real_time_status(&self) -> RealTimeStatus {
        RealTimeStatus {
            sessions: self.inner.chat.watch_hub().is_watching(),
            edit_state: self.inner.edit.watch_hub().is_watching(),
            logs: self.inner.logs.watch_hub().is_watching(),
        }
    }

    /// Merge one re-parsed chat session as a watcher would.
    pub fn apply_chat_session(&self, result: &ChatSessionScanResult) {
        self.inner.on_chat_changed(result);
    }

    /// Merge one re-parsed edit-state file as a watcher would.
    pub fn apply_edit_state(&self, result: &EditStateScanResult) {
        self.inner.on_edit_state_changed(result);
    }

    /// Merge newly read log entries as a watcher would.
    pub fn apply_log_update(&self, update: &LogFileUpdate) {
        self.inner.on_log_changed(update);
    }

    /// Read appended log content now instead of waiting for a watcher.
    pub fn poll_logs(&self) -> Result<usize> {
        self.ensure_live()?;
        let scan = self.inner.logs.scan_incremental()?;
        let count = scan.entries.len();
        self.inner.on_log_changed(&LogFileUpdate {
            path: Default::default(),
            entries: scan.entries,
            truncated: false,
            dropped: scan.stats.dropped_records,
        });
        Ok(count)
    }

    /// Forget the collection and all log offsets; the next
    /// [`initialize`](Self::initialize) rescans from disk.
    pub fn reset_initialization(&self) {
        let mut state = lock(&self.inner.state);
        state.initialized = false;
        state.store.clear();
        state.last_stats = None;
        drop(state);
        self.inner.logs.reset();
        tracing::info!("Service reset to cold start");
    }

    /// Plain-data snapshot of everything known.
    pub fn export_data(&self) -> Result<ExportData> {
        self.ensure_live()?;
        let state = lock(&self.inner.state);
        if !state.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(ExportData {
            exported_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            stats: state.last_stats.clone(),
            events: state.store.sorted_events(),
            log_entries: state.store.log_entries().to_vec(),
            edit_sessions: state.store.edit_sessions(),
        })
    }

    /// [`reset_initialization`](Self::reset_initialization) plus clearing
    /// every bound analytics index.
    pub fn clear_data(&self) {
        self.reset_initialization();
        for analytics in lock(&self.inner.bound_analytics).iter() {
            analytics
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear();
        }
    }

    /// Keep `analytics` in step with the collection: replaced on full scans,
    /// merged on incremental updates. Indexes the current collection at once
    /// if already initialized.
    pub fn bind_analytics(&self, analytics: Arc<RwLock<AnalyticsService>>) -> ObserverId {
        if let Ok(events) = self.session_events() {
            write_analytics(&analytics).ingest(&events, true);
        }
        lock(&self.inner.bound_analytics).push(Arc::clone(&analytics));

        self.on_session_events_updated(Arc::new(move |update: &SessionEventsUpdate| {
            let mut index = write_analytics(&analytics);
            match update.kind {
                UpdateKind::FullScan => index.ingest(&update.events, true),
                UpdateKind::Incremental => {
                    index.remove(&update.removed);
                    index.ingest(&update.events, false);
                }
            }
        }))
    }

    /// Stop watchers, drop pending timers and subscribers. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_real_time_updates();
        self.inner.session_observers.clear();
        self.inner.log_observers.clear();
        lock(&self.inner.bound_analytics).clear();
        tracing::debug!("Service disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for UnifiedSessionDataService {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ServiceInner {
    /// Whether a watcher update may be merged right now.
    ///
    /// Updates before the first scan are dropped. That scan reads every
    /// file from the start, log offsets included, so nothing is lost.
    fn accepting(&self) -> Option<std::sync::MutexGuard<'_, ServiceState>> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        let state = lock(&self.state);
        if !state.initialized {
            tracing::debug!("Update before first scan ignored");
            return None;
        }
        Some(state)
    }

    fn on_chat_changed(&self, result: &ChatSessionScanResult) {
        let Some(mut state) = self.accepting() else {
            return;
        };
        let delta = state.store.apply_chat_events(result.to_events(&self.host));
        drop(state);
        tracing::debug!(
            path = %result.path.display(),
            changed = delta.changed.len(),
            removed = delta.removed.len(),
            "Chat session merged"
        );
        self.publish(delta);
    }

    fn on_edit_state_changed(&self, result: &EditStateScanResult) {
        let Some(mut state) = self.accepting() else {
            return;
        };
        let delta = state.store.apply_edit_session(result.session_requests());
        drop(state);
        tracing::debug!(
            session = %result.session_id,
            changed = delta.changed.len(),
            "Edit-state merged"
        );
        self.publish(delta);
    }

    fn on_log_changed(&self, update: &LogFileUpdate) {
        if update.entries.is_empty() {
            return;
        }
        let Some(mut state) = self.accepting() else {
            return;
        };
        let (delta, fresh) = state
            .store
            .apply_log_entries(update.entries.clone(), &self.host);
        drop(state);
        if !fresh.is_empty() {
            self.log_observers.dispatch(&fresh);
        }
        self.publish(delta);
    }

    fn publish(&self, delta: EventsDelta) {
        if delta.is_empty() || self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.session_observers.dispatch(&SessionEventsUpdate {
            kind: UpdateKind::Incremental,
            events: delta.changed,
            removed: delta.removed,
        });
    }
}

/// Watcher callback that reaches the service only while it is alive.
fn forward<T: 'static>(
    weak: &Weak<ServiceInner>,
    apply: fn(&ServiceInner, &T),
) -> Callback<T> {
    let weak = weak.clone();
    Arc::new(move |value: &T| {
        if let Some(inner) = weak.upgrade() {
            apply(&inner, value);
        }
    })
}

fn report(source: &str, result: Result<ObserverId>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(source, error = %e, "Real-time updates unavailable, pull mode only");
            false
        }
    }
}

fn write_analytics(
    analytics: &RwLock<AnalyticsService>,
) -> std::sync::RwLockWriteGuard<'_, AnalyticsService> {
    analytics
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(storage: &Path, logs: &Path) -> Config {
        let mut config = Config::default();
        config.sources.storage_roots = vec![storage.to_path_buf()];
        config.sources.log_roots = vec![logs.to_path_buf()];
        config.watch.enabled = false;
        config.host.session_id = Some("host-1".to_string());
        config
    }

    fn write_session(storage: &Path, name: &str, body: &str) {
        let dir = storage.join("ws1/chatSessions");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    const SESSION: &str = r#"{"sessionId": "s1", "requests": [
        {"requestId": "request_r1", "timestamp": 1736503201000, "message": {"text": "hi"}}
    ]}"#;

    fn log_block(request: &str, second: u32) -> String {
        format!(
            "2025-01-10 10:00:{second:02}.100 [info] message 1 returned. finish reason: [stop]\n\
             2025-01-10 10:00:{second:02}.110 [info] request done: requestId: [{request}] model deployment ID: [dep1]\n\
             2025-01-10 10:00:{second:02}.120 [info] ccreq:c{second} | success | gpt-4.1 | 640ms | [panel/editAgent]\n"
        )
    }

    fn write_log(logs: &Path, text: &str) -> std::path::PathBuf {
        let dir = logs.join("20250110T100000/window1/exthost/GitHub.copilot-chat");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("GitHub Copilot Chat.log");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        std::io::Write::write_all(&mut file, text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_queries_before_initialize_fail() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));
        assert!(matches!(service.session_events(), Err(Error::NotInitialized)));
        assert!(matches!(service.export_data(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_initialize_scans_once() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));

        service.initialize().unwrap();
        assert_eq!(service.session_events().unwrap().len(), 1);

        write_session(storage.path(), "s2.json", r#"{"sessionId": "s2", "requests": [
            {"requestId": "request_r2", "timestamp": 1736503202000}
        ]}"#);
        service.initialize().unwrap();
        assert_eq!(service.session_events().unwrap().len(), 1);

        service.scan_all_data().unwrap();
        assert_eq!(service.session_events().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_log_root_degrades_only_logs() {
        let storage = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let service = UnifiedSessionDataService::new(&config(
            storage.path(),
            Path::new("/no/such/log/root"),
        ));

        let outcome = service.scan_all_data().unwrap();
        assert_eq!(outcome.session_events.len(), 1);
        assert_eq!(outcome.stats.degraded_sources, vec!["logs"]);
    }

    #[test]
    fn test_missing_storage_roots_fail_the_scan() {
        let logs = TempDir::new().unwrap();
        let service =
            UnifiedSessionDataService::new(&config(Path::new("/no/such/storage"), logs.path()));
        assert!(matches!(
            service.scan_all_data(),
            Err(Error::StorageRootsUnavailable(_))
        ));
        assert!(!service.is_initialized());
    }

    #[test]
    fn test_log_read_during_full_scan_survives_the_merge() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let path = write_log(logs.path(), &log_block("r1", 1));
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));
        service.initialize().unwrap();

        // A watcher reads the append after the scan has read the file but
        // before the scan commits
        let inner = Arc::clone(&service.inner);
        let mut merger = None;
        let outcome = service
            .full_scan(|| {
                write_log(logs.path(), &log_block("late7", 7));
                let update = inner.logs.read_file(&path).unwrap();
                assert_eq!(update.entries.len(), 1);
                let inner = Arc::clone(&inner);
                merger = Some(std::thread::spawn(move || inner.on_log_changed(&update)));
            })
            .unwrap();
        merger.unwrap().join().unwrap();

        assert_eq!(outcome.stats.logs.total_turns, 1);
        let entries = service.log_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.request_id == "late7"));
        assert!(service
            .session_events()
            .unwrap()
            .iter()
            .any(|e| e.request_id.as_deref() == Some("late7")));
        assert_eq!(service.poll_logs().unwrap(), 0);
    }

    #[test]
    fn test_log_read_before_first_scan_is_not_lost() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let path = write_log(logs.path(), &log_block("early3", 3));
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));

        let update = service.inner.logs.read_file(&path).unwrap();
        assert_eq!(update.entries.len(), 1);
        service.apply_log_update(&update);
        assert!(!service.is_initialized());

        service.initialize().unwrap();
        let entries = service.log_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_id, "early3");
    }

    #[test]
    fn test_incremental_update_notifies_and_feeds_analytics() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));
        let analytics = Arc::new(RwLock::new(AnalyticsService::new()));
        service.bind_analytics(Arc::clone(&analytics));
        service.initialize().unwrap();
        assert_eq!(analytics.read().unwrap().len(), 1);

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        service.on_session_events_updated(Arc::new(move |u: &SessionEventsUpdate| {
            sink.lock().unwrap().push((u.kind, u.events.len()));
        }));

        let mut edit = EditStateScanResult {
            session_id: "e1".to_string(),
            file: serde_json::from_str(
                r#"{"linearHistory": [{"requestId": "request_r1", "stops": [{"entries": [{"resource": "a"}]}]}]}"#,
            )
            .unwrap(),
            path: storage.path().join("ws1/chatEditingSessions/e1/state.json"),
            modified_at: Utc::now(),
            size_bytes: 0,
        };
        service.apply_edit_state(&edit);

        let events = service.session_events().unwrap();
        assert!(events[0].is_in_edit);
        assert_eq!(events[0].files_modified, 1);
        assert_eq!(*updates.lock().unwrap(), vec![(UpdateKind::Incremental, 1)]);
        assert!(analytics.read().unwrap().events()[0].is_in_edit);

        // Same content again: nothing changes, nobody is notified
        edit.size_bytes = 1;
        service.apply_edit_state(&edit);
        assert_eq!(updates.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_data_resets_service_and_analytics() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));
        let analytics = Arc::new(RwLock::new(AnalyticsService::new()));
        service.bind_analytics(Arc::clone(&analytics));
        service.initialize().unwrap();

        service.clear_data();
        assert!(!service.is_initialized());
        assert!(analytics.read().unwrap().is_empty());
        assert!(service.last_scan_stats().is_none());
    }

    #[test]
    fn test_dispose_blocks_further_use() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_session(storage.path(), "s1.json", SESSION);
        let service = UnifiedSessionDataService::new(&config(storage.path(), logs.path()));
        service.initialize().unwrap();

        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&calls);
        service.on_session_events_updated(Arc::new(move |_| *sink.lock().unwrap() += 1));

        service.dispose();
        service.dispose();
        assert!(matches!(service.session_events(), Err(Error::Disposed)));
        assert!(matches!(service.scan_all_data(), Err(Error::Disposed)));

        let result = crate::ingest::scanners::chat_sessions::parse_session_file(
            &storage.path().join("ws1/chatSessions/s1.json"),
        )
        .unwrap();
        service.apply_chat_session(&result);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_real_time_without_runtime_stays_pull_only() {
        let storage = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut config = config(storage.path(), logs.path());
        config.watch.enabled = true;

        let service = UnifiedSessionDataService::new(&config);
        assert!(!service.real_time_status().any());
    }
}
