//! Integration tests for the scan and merge pipeline
//!
//! Each test builds a throwaway storage root and log root, then drives
//! [`UnifiedSessionDataService`] and [`AnalyticsService`] end to end.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use usagelens_core::analytics::{Filter, TimeRange};
use usagelens_core::{
    AnalyticsService, Config, EventSource, EventType, LogEntry, UnifiedSessionDataService,
};

const SESSION: &str = r#"{
  "version": 3,
  "sessionId": "s1",
  "creationDate": 1736503200000,
  "requests": [
    {
      "requestId": "request_abc123",
      "timestamp": 1736503201000,
      "message": {"text": "why does this loop never end?"},
      "agent": {"id": "github.copilot.default"}
    },
    {
      "requestId": "request_r2",
      "timestamp": 1736503260000,
      "modelId": "gpt-4o",
      "message": {"text": "/edit rename the helper"},
      "agent": {"id": "github.copilot.editsAgent"},
      "result": {"timings": {"totalElapsed": 1800}},
      "variableData": {"variables": [{"value": {"uri": {"path": "/src/main.rs"}}}]}
    }
  ]
}"#;

const EDIT_STATE: &str = r#"{
  "version": 1,
  "linearHistory": [
    {"requestId": "request_r2", "stops": [
      {"entries": [{"resource": "file:///src/main.rs"}, {"resource": "file:///src/lib.rs"}]},
      {"entries": [{"resource": "file:///src/main.rs"}]}
    ]}
  ]
}"#;

fn log_block(request: &str, ccreq: &str, second: u32) -> String {
    format!(
        "2025-01-10 10:00:{second:02}.100 [info] message 1 returned. finish reason: [stop]\n\
         2025-01-10 10:00:{second:02}.110 [info] request done: requestId: [{request}] model deployment ID: [dep1]\n\
         2025-01-10 10:00:{second:02}.120 [info] ccreq:{ccreq} | success | gpt-4.1 | 640ms | [panel/editAgent]\n"
    )
}

struct Fixture {
    _storage: TempDir,
    _logs: TempDir,
    storage_root: PathBuf,
    log_file: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let storage = TempDir::new().expect("failed to create storage root");
        let logs = TempDir::new().expect("failed to create log root");

        let chat_dir = storage.path().join("ws1/chatSessions");
        fs::create_dir_all(&chat_dir).unwrap();
        fs::write(chat_dir.join("s1.json"), SESSION).unwrap();

        let edit_dir = storage.path().join("ws1/chatEditingSessions/e1");
        fs::create_dir_all(&edit_dir).unwrap();
        fs::write(edit_dir.join("state.json"), EDIT_STATE).unwrap();

        let log_dir = logs
            .path()
            .join("20250110T100000/window1/exthost/GitHub.copilot-chat");
        fs::create_dir_all(&log_dir).unwrap();
        let log_file = log_dir.join("GitHub Copilot Chat.log");
        fs::write(&log_file, log_block("abc123", "c1", 1)).unwrap();

        Self {
            storage_root: storage.path().to_path_buf(),
            _storage: storage,
            _logs: logs,
            log_file,
        }
    }

    fn log_root(&self) -> &Path {
        self._logs.path()
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.sources.storage_roots = vec![self.storage_root.clone()];
        config.sources.log_roots = vec![self.log_root().to_path_buf()];
        config.watch.enabled = false;
        config.host.session_id = Some("host-session".to_string());
        config
    }

    fn append_log(&self, text: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_file)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }
}

fn all_time() -> Filter {
    Filter::new(TimeRange::All).as_of(Utc.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap())
}

// ============================================
// Full scan
// ============================================

#[test]
fn test_full_scan_merges_all_sources() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());

    let outcome = service.scan_all_data().expect("scan should succeed");
    assert_eq!(outcome.session_events.len(), 2);
    assert_eq!(outcome.stats.sessions.total_files, 1);
    assert_eq!(outcome.stats.edit_state.total_files, 1);
    assert_eq!(outcome.stats.logs.total_turns, 1);
    assert_eq!(outcome.stats.events_in_edit, 1);
    assert_eq!(outcome.stats.log_only_events, 0);
    assert!(outcome.stats.degraded_sources.is_empty());

    // Sorted by timestamp
    let events = service.session_events().unwrap();
    assert!(events[0].timestamp < events[1].timestamp);
    assert!(events
        .iter()
        .all(|e| e.vscode_session_id == "host-session" && e.source == EventSource::ChatPanel));
}

#[test]
fn test_log_entry_enriches_matching_chat_event() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    service.initialize().unwrap();

    let events = service.session_events().unwrap();
    let first = events
        .iter()
        .find(|e| e.request_id.as_deref() == Some("request_abc123"))
        .expect("chat event for abc123");
    assert_eq!(first.model.as_deref(), Some("gpt-4.1"));
    assert_eq!(first.duration_ms, Some(640));
    assert_eq!(first.window_id.as_deref(), Some("window1"));

    // Values the session already carried are not overwritten
    let second = events
        .iter()
        .find(|e| e.request_id.as_deref() == Some("request_r2"))
        .unwrap();
    assert_eq!(second.model.as_deref(), Some("gpt-4o"));
    assert_eq!(second.duration_ms, Some(1800));
}

#[test]
fn test_edit_state_correlates_by_request_id() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    service.initialize().unwrap();

    let events = service.session_events().unwrap();
    let edited = events
        .iter()
        .find(|e| e.request_id.as_deref() == Some("request_r2"))
        .unwrap();
    assert!(edited.is_in_edit);
    assert_eq!(edited.files_modified, 2);
    assert_eq!(edited.event_type, EventType::Edit);

    let plain = events
        .iter()
        .find(|e| e.request_id.as_deref() == Some("request_abc123"))
        .unwrap();
    assert!(!plain.is_in_edit);
    assert_eq!(plain.files_modified, 0);

    let sessions = service.edit_state_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].requests, vec!["request_r2"]);
}

#[test]
fn test_malformed_files_are_counted_not_fatal() {
    let fixture = Fixture::new();
    let chat_dir = fixture.storage_root.join("ws1/chatSessions");
    fs::write(chat_dir.join("broken.json"), "{ not json").unwrap();
    let edit_dir = fixture.storage_root.join("ws1/chatEditingSessions/e2");
    fs::create_dir_all(&edit_dir).unwrap();
    fs::write(edit_dir.join("state.json"), "{ truncated").unwrap();

    let service = UnifiedSessionDataService::new(&fixture.config());
    let outcome = service.scan_all_data().unwrap();

    assert_eq!(outcome.session_events.len(), 2);
    assert_eq!(outcome.stats.sessions.total_files, 2);
    assert_eq!(outcome.stats.sessions.error_files, 1);
    assert_eq!(outcome.stats.edit_state.error_files, 1);
}

// ============================================
// Incremental updates
// ============================================

#[test]
fn test_appended_log_creates_log_only_event() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    service.initialize().unwrap();

    let received: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    service.on_log_entries_updated(Arc::new(move |entries: &Vec<LogEntry>| {
        sink.lock().unwrap().extend(entries.iter().cloned());
    }));

    fixture.append_log(&log_block("orphan9", "c9", 30));
    assert_eq!(service.poll_logs().unwrap(), 1);

    // Nothing new on the second poll
    assert_eq!(service.poll_logs().unwrap(), 0);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].request_id, "orphan9");

    let events = service.session_events().unwrap();
    assert_eq!(events.len(), 3);
    let orphan = events
        .iter()
        .find(|e| e.request_id.as_deref() == Some("orphan9"))
        .expect("log-only event");
    assert_eq!(orphan.source, EventSource::Sidebar);
    assert!(orphan.workspace_id.is_none());
    assert_eq!(service.log_entries().unwrap().len(), 2);
}

#[test]
fn test_bound_analytics_follow_updates() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    let analytics = Arc::new(RwLock::new(AnalyticsService::new()));
    service.bind_analytics(Arc::clone(&analytics));
    service.initialize().unwrap();

    {
        let index = analytics.read().unwrap();
        let kpis = index.get_kpis(&all_time());
        assert_eq!(kpis.turns, 2);
        assert_eq!(kpis.edits, 1);
        assert_eq!(kpis.file_modifications, 2);
    }

    fixture.append_log(&log_block("orphan9", "c9", 30));
    service.poll_logs().unwrap();

    let index = analytics.read().unwrap();
    assert_eq!(index.get_kpis(&all_time()).turns, 3);
    let models = index.get_models(&all_time(), 5);
    assert_eq!(models[0].model, "gpt-4.1");
    assert_eq!(models[0].count, 2);
}

// ============================================
// Export and reset
// ============================================

#[test]
fn test_export_contains_everything() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    service.initialize().unwrap();

    let export = service.export_data().unwrap();
    assert_eq!(export.events.len(), 2);
    assert_eq!(export.log_entries.len(), 1);
    assert_eq!(export.edit_sessions.len(), 1);
    assert!(export.stats.is_some());

    let json = serde_json::to_value(&export).unwrap();
    assert_eq!(json["events"].as_array().map(Vec::len), Some(2));
    assert!(json["logEntries"][0]["ccreqId"].is_string());
}

#[test]
fn test_clear_then_initialize_rescans() {
    let fixture = Fixture::new();
    let service = UnifiedSessionDataService::new(&fixture.config());
    service.initialize().unwrap();

    service.clear_data();
    assert!(service.session_events().is_err());

    fixture.append_log(&log_block("orphan9", "c9", 30));
    service.initialize().unwrap();

    // Offsets were reset, so both log blocks are read again
    assert_eq!(service.log_entries().unwrap().len(), 2);
    assert_eq!(service.session_events().unwrap().len(), 3);
}
