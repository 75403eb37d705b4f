//! Edit-state scanner
//!
//! Reads `<storage root>/<workspace>/chatEditingSessions/<id>/state.json`.
//! Only `linearHistory[].requestId` and the resources under its stops are
//! interpreted; everything else is carried along untouched.

use crate::error::{Error, Result};
use crate::ingest::scanner::{FileMeta, SourcePattern, SourceScanner};
use crate::types::{EditStateFile, EditStateScanResult, EditStateSessionRequests, ScanStats};
use crate::watch::{Callback, FileHandler, ObserverId, WatchHub, WatchSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Edit timelines are rewritten often while an edit is in progress
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Everything a full edit-state scan produced
#[derive(Debug, Clone, Default)]
pub struct EditStateScan {
    pub results: Vec<EditStateScanResult>,
    pub stats: ScanStats,
    /// Request sequences per session, in history order
    pub session_requests: Vec<EditStateSessionRequests>,
}

/// Scanner for `chatEditingSessions/*/state.json`
pub struct EditStateScanner {
    roots: Vec<PathBuf>,
    debounce: Duration,
    max_retries: u32,
    watch: WatchHub<EditStateScanResult>,
}

impl EditStateScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            debounce: DEFAULT_DEBOUNCE,
            max_retries: 3,
            watch: WatchHub::new(),
        }
    }

    pub fn with_watch_settings(mut self, debounce: Duration, max_retries: u32) -> Self {
        self.debounce = debounce;
        self.max_retries = max_retries;
        self
    }

    pub fn scan_all(&self) -> Result<EditStateScan> {
        let (results, stats) = self.scan_files()?;
        let session_requests = results.iter().map(|r| r.session_requests()).collect();
        Ok(EditStateScan {
            results,
            stats,
            session_requests,
        })
    }

    pub fn start_watching(&self, callback: Callback<EditStateScanResult>) -> Result<ObserverId> {
        let spec = WatchSpec {
            roots: self.roots.clone(),
            pattern: self.source_pattern().compiled_watch_pattern()?,
            debounce: self.debounce,
            max_retries: self.max_retries,
        };
        let handler: FileHandler<EditStateScanResult> = Arc::new(parse_state_file);
        self.watch.start(&spec, handler, callback)
    }

    pub fn stop_watching(&self) {
        self.watch.stop();
    }

    pub fn watch_hub(&self) -> &WatchHub<EditStateScanResult> {
        &self.watch
    }
}

impl SourceScanner for EditStateScanner {
    type Output = EditStateScanResult;

    fn name(&self) -> &'static str {
        "edit-state"
    }

    fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn source_pattern(&self) -> SourcePattern {
        SourcePattern {
            pattern: "*/chatEditingSessions/*/state.json".to_string(),
            watch_pattern: "**/chatEditingSessions/*/state.json".to_string(),
            description: "Edit-state timelines".to_string(),
        }
    }

    fn parse_file(&self, path: &Path) -> Option<EditStateScanResult> {
        parse_state_file(path)
    }

    fn record_count(output: &EditStateScanResult) -> usize {
        output.file.linear_history.len()
    }
}

/// Read and decode one `state.json`, logging the reason on failure.
pub fn parse_state_file(path: &Path) -> Option<EditStateScanResult> {
    let result = FileMeta::read(path).and_then(|meta| {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        parse_state_document(path, &text, meta)
    });

    match result {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse edit-state file");
            None
        }
    }
}

/// Decode a `state.json` that has already been read.
///
/// The session id is the document's `sessionId`, else the directory name.
pub fn parse_state_document(path: &Path, text: &str, meta: FileMeta) -> Result<EditStateScanResult> {
    let file: EditStateFile = serde_json::from_str(text)?;
    let session_id = file
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            path.parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    Ok(EditStateScanResult {
        session_id,
        file,
        path: path.to_path_buf(),
        modified_at: meta.modified_at,
        size_bytes: meta.size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn write_state(root: &Path, session: &str, content: &str) {
        let dir = root.join("ws1/chatEditingSessions").join(session);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("state.json"), content).unwrap();
    }

    #[test]
    fn test_session_id_falls_back_to_directory() {
        let meta = FileMeta {
            size_bytes: 0,
            modified_at: Utc::now(),
        };
        let path = Path::new("/s/ws/chatEditingSessions/dir-id/state.json");
        let result = parse_state_document(path, r#"{"version": 1}"#, meta).unwrap();
        assert_eq!(result.session_id, "dir-id");

        let result =
            parse_state_document(path, r#"{"sessionId": "doc-id"}"#, meta).unwrap();
        assert_eq!(result.session_id, "doc-id");
    }

    #[test]
    fn test_scan_all_derives_request_sequences() {
        let dir = TempDir::new().unwrap();
        write_state(
            dir.path(),
            "e1",
            r#"{"sessionId": "e1", "linearHistory": [
                {"requestId": "request_a", "stops": [{"entries": [{"resource": "file:///x.rs"}]}]},
                {"requestId": "request_b"}
            ]}"#,
        );
        write_state(dir.path(), "e2", r#"{"linearHistory": null}"#);
        write_state(dir.path(), "e3", "not json");

        let scanner = EditStateScanner::new(vec![dir.path().to_path_buf()]);
        let scan = scanner.scan_all().unwrap();

        assert_eq!(scan.stats.total_files, 3);
        assert_eq!(scan.stats.error_files, 1);
        assert_eq!(scan.stats.total_turns, 2);

        let e1 = scan
            .session_requests
            .iter()
            .find(|s| s.session_id == "e1")
            .unwrap();
        assert_eq!(e1.requests, vec!["request_a", "request_b"]);
        assert_eq!(e1.files_modified, vec![1, 0]);

        let e2 = scan
            .session_requests
            .iter()
            .find(|s| s.session_id == "e2")
            .unwrap();
        assert!(e2.requests.is_empty());
    }
}
