//! Request log scanner
//!
//! Reads `<log root>/<session stamp>/window<N>/exthost/GitHub.copilot-chat/*.log`.
//!
//! ## Incremental Reading
//!
//! Each file keeps a byte offset and a small carry buffer. The offset marks
//! how far the file has been read; the carry holds the unmatched tail of the
//! last read (at most two complete lines plus a partial one), so a request
//! block split across two appends still matches on the next read. A file
//! that shrank below its offset is re-read from the start with an empty
//! carry.

use crate::error::Result;
use crate::ingest::log_parsing::{read_new_content, scan_request_blocks};
use crate::ingest::scanner::{SourcePattern, SourceScanner};
use crate::types::{LogEntry, ScanStats};
use crate::watch::{lock, Callback, FileHandler, ObserverId, WatchHub, WatchSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Complete lines kept in the carry; a block is three lines long
const CARRY_LINES: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TailState {
    offset: u64,
    carry: String,
}

/// New entries read from one log file
#[derive(Debug, Clone, PartialEq)]
pub struct LogFileUpdate {
    pub path: PathBuf,
    pub entries: Vec<LogEntry>,
    /// The file shrank and was re-read from the start
    pub truncated: bool,
    /// Request blocks that matched but failed to parse
    pub dropped: usize,
}

/// Everything a log scan produced
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    pub entries: Vec<LogEntry>,
    pub stats: ScanStats,
}

/// Scanner for the Copilot Chat request logs
pub struct LogScanner {
    roots: Vec<PathBuf>,
    debounce: Duration,
    max_retries: u32,
    tails: Arc<Mutex<HashMap<PathBuf, TailState>>>,
    watch: WatchHub<LogFileUpdate>,
}

impl LogScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            debounce: DEFAULT_DEBOUNCE,
            max_retries: 3,
            tails: Arc::new(Mutex::new(HashMap::new())),
            watch: WatchHub::new(),
        }
    }

    pub fn with_watch_settings(mut self, debounce: Duration, max_retries: u32) -> Self {
        self.debounce = debounce;
        self.max_retries = max_retries;
        self
    }

    /// Forget every offset and carry.
    pub fn reset(&self) {
        lock(&self.tails).clear();
    }

    /// Read every log file from the beginning.
    pub fn scan_all(&self) -> Result<LogScan> {
        self.scan(true)
    }

    /// Read only what was appended since the last scan. Files not seen
    /// before are read in full.
    pub fn scan_incremental(&self) -> Result<LogScan> {
        self.scan(false)
    }

    /// Read one file from its stored offset.
    pub fn read_file(&self, path: &Path) -> Result<LogFileUpdate> {
        read_tail(&self.tails, path, false)
    }

    /// Stored offset for a file, if it has been read.
    pub fn offset_of(&self, path: &Path) -> Option<u64> {
        lock(&self.tails).get(path).map(|t| t.offset)
    }

    pub fn start_watching(&self, callback: Callback<LogFileUpdate>) -> Result<ObserverId> {
        let spec = WatchSpec {
            roots: self.roots.clone(),
            pattern: self.source_pattern().compiled_watch_pattern()?,
            debounce: self.debounce,
            max_retries: self.max_retries,
        };
        let tails = Arc::clone(&self.tails);
        let handler: FileHandler<LogFileUpdate> =
            Arc::new(move |path: &Path| match read_tail(&tails, path, false) {
                Ok(update) => Some(update),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Log tail read failed");
                    None
                }
            });
        self.watch.start(&spec, handler, callback)
    }

    pub fn stop_watching(&self) {
        self.watch.stop();
    }

    pub fn watch_hub(&self) -> &WatchHub<LogFileUpdate> {
        &self.watch
    }

    fn scan(&self, full: bool) -> Result<LogScan> {
        let started = Instant::now();
        let files = self.find_all_files()?;
        if full {
            self.reset();
        }

        let mut scan = LogScan {
            stats: ScanStats {
                total_files: files.len(),
                ..Default::default()
            },
            ..Default::default()
        };

        for path in &files {
            match read_tail(&self.tails, path, full) {
                Ok(update) => {
                    scan.stats.dropped_records += update.dropped;
                    scan.entries.extend(update.entries);
                }
                Err(e) => {
                    scan.stats.error_files += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read log file");
                }
            }
        }

        scan.stats.total_turns = scan.entries.len();
        scan.stats.scan_duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            scanner = self.name(),
            full,
            files = scan.stats.total_files,
            errors = scan.stats.error_files,
            entries = scan.stats.total_turns,
            dropped = scan.stats.dropped_records,
            duration_ms = scan.stats.scan_duration_ms,
            "Log scan complete"
        );
        Ok(scan)
    }
}

impl SourceScanner for LogScanner {
    type Output = LogFileUpdate;

    fn name(&self) -> &'static str {
        "request-logs"
    }

    fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn source_pattern(&self) -> SourcePattern {
        SourcePattern {
            pattern: "*/window*/exthost/GitHub.copilot-chat/*.log".to_string(),
            watch_pattern: "**/window*/exthost/GitHub.copilot-chat/*.log".to_string(),
            description: "Copilot Chat request logs".to_string(),
        }
    }

    fn parse_file(&self, path: &Path) -> Option<LogFileUpdate> {
        match self.read_file(path) {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read log file");
                None
            }
        }
    }

    fn record_count(output: &LogFileUpdate) -> usize {
        output.entries.len()
    }

    fn dropped_count(output: &LogFileUpdate) -> usize {
        output.dropped
    }
}

/// Read new content for `path` and advance its stored state.
///
/// The state lock is held for the whole read so two readers of the same
/// file cannot both consume one append.
fn read_tail(
    tails: &Mutex<HashMap<PathBuf, TailState>>,
    path: &Path,
    full: bool,
) -> Result<LogFileUpdate> {
    let mut tails = lock(tails);
    let previous = if full {
        TailState::default()
    } else {
        tails.get(path).cloned().unwrap_or_default()
    };

    let tail = read_new_content(path, previous.offset)?;
    let mut buffer = if tail.truncated {
        String::new()
    } else {
        previous.carry
    };
    buffer.push_str(&tail.content);

    let blocks = scan_request_blocks(&buffer);
    let carry = carry_tail(&buffer[blocks.consumed..], CARRY_LINES);
    tails.insert(
        path.to_path_buf(),
        TailState {
            offset: tail.new_position,
            carry,
        },
    );
    drop(tails);

    let (log_session_id, window_id) = window_context(path);
    let entries = blocks
        .entries
        .into_iter()
        .map(|mut entry| {
            entry.window_id = window_id.clone();
            entry.log_session_id = log_session_id.clone();
            entry
        })
        .collect();

    Ok(LogFileUpdate {
        path: path.to_path_buf(),
        entries,
        truncated: tail.truncated,
        dropped: blocks.dropped,
    })
}

/// The last `lines` complete lines of `rest` plus any trailing partial line.
fn carry_tail(rest: &str, lines: usize) -> String {
    let mut seen = 0;
    for (i, byte) in rest.bytes().enumerate().rev() {
        if byte == b'\n' {
            seen += 1;
            if seen > lines {
                return rest[i + 1..].to_string();
            }
        }
    }
    rest.to_string()
}

/// `(session stamp, window<N>)` from a log path.
fn window_context(path: &Path) -> (Option<String>, Option<String>) {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    match components.iter().rposition(|c| c.starts_with("window")) {
        Some(i) => (
            i.checked_sub(1).map(|p| components[p].clone()),
            Some(components[i].clone()),
        ),
        None => (None, None),
    }
}
