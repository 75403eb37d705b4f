//! Text-to-record extraction for request logs.
//!
//! Stateless helpers: timestamp normalization, the three-line request block
//! matcher, and whole-file / tail reads with truncation detection.
//!
//! A request block looks like this (three contiguous lines):
//!
//! ```text
//! 2025-01-10 10:00:00.100 [info] message 1 returned. finish reason: [stop]
//! 2025-01-10 10:00:00.110 [info] request done: requestId: [abc123] model deployment ID: [dep1]
//! 2025-01-10 10:00:00.120 [info] ccreq:xyz | success | gpt-4 | 500ms | [panel/editAgent]
//! ```
//!
//! The `ccreq` line's timestamp is authoritative for the entry.

use crate::error::{Error, Result};
use crate::types::{LogEntry, LogStatus};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::{Captures, Regex};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::LazyLock;

/// Timestamp layouts the producer is known to write, tried in order.
///
/// Log timestamps are wall-clock local time without an offset.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.3f"];

static REQUEST_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^[^\n]*?\[info\] message \d+ returned\. finish reason: \[(?P<finish>[^\]\n]*)\][^\n]*\r?\n",
        r"[^\n]*?\[info\] request done: requestId: \[(?P<request>[^\]\n]*)\] model deployment ID: \[(?P<deployment>[^\]\n]*)\][^\n]*\r?\n",
        r"(?P<ts>[^\n\[]*?)\s*\[info\] ccreq:(?P<ccreq>[^\s|]+)\s*\|\s*(?P<status>[^|\s]+)\s*\|\s*(?P<model>[^|\n]+?)\s*\|\s*(?P<duration>[^|\n]+?)\s*\|\s*\[(?P<context>[^\]\n]*)\]",
    ))
    .expect("request block pattern is valid")
});

/// Parse a log timestamp (`YYYY-MM-DD HH:mm:ss.SSS`, local time).
///
/// Fails with [`Error::InvalidFormat`] instead of defaulting; windowing
/// downstream depends on every timestamp being real.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    for format in TIMESTAMP_FORMATS {
        let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) else {
            continue;
        };
        return Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| invalid_timestamp(trimmed));
    }
    Err(invalid_timestamp(trimmed))
}

fn invalid_timestamp(input: &str) -> Error {
    Error::InvalidFormat {
        input: input.to_string(),
        expected: "YYYY-MM-DD HH:mm:ss.SSS".to_string(),
    }
}

/// Entries matched in a buffer, plus how far into the buffer matching got.
#[derive(Debug, Default)]
pub struct RequestBlocks {
    pub entries: Vec<LogEntry>,
    /// Byte index just past the last matched block (0 if nothing matched)
    pub consumed: usize,
    /// Blocks that matched but failed timestamp/number parsing
    pub dropped: usize,
}

/// Find every request block in `content`.
///
/// Matches are global and non-overlapping. A block whose timestamp or
/// duration does not parse is dropped on its own; later blocks still count.
pub fn parse_multi_line_requests(content: &str) -> Vec<LogEntry> {
    scan_request_blocks(content).entries
}

/// Like [`parse_multi_line_requests`] but also reports the consumed prefix.
pub fn scan_request_blocks(content: &str) -> RequestBlocks {
    let mut blocks = RequestBlocks::default();

    for caps in REQUEST_BLOCK.captures_iter(content) {
        if let Some(whole) = caps.get(0) {
            blocks.consumed = whole.end();
        }
        match entry_from_captures(&caps) {
            Ok(entry) => blocks.entries.push(entry),
            Err(e) => {
                blocks.dropped += 1;
                tracing::debug!(error = %e, "Dropping malformed request block");
            }
        }
    }

    blocks
}

fn entry_from_captures(caps: &Captures<'_>) -> Result<LogEntry> {
    let field = |name: &str| caps.name(name).map(|m| m.as_str().trim()).unwrap_or("");

    let timestamp = parse_timestamp(field("ts"))?;
    let duration = field("duration");
    let response_time = duration
        .strip_suffix("ms")
        .unwrap_or(duration)
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::InvalidFormat {
            input: duration.to_string(),
            expected: "<milliseconds>ms".to_string(),
        })?;

    Ok(LogEntry {
        timestamp,
        request_id: field("request").to_string(),
        model_name: field("model").to_string(),
        response_time,
        status: LogStatus::from_log(field("status")),
        finish_reason: field("finish").to_string(),
        context: field("context").to_string(),
        ccreq_id: field("ccreq").to_string(),
        deployment_id: field("deployment").to_string(),
        window_id: None,
        log_session_id: None,
        raw: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

/// Read a whole file as text (invalid UTF-8 is replaced).
pub fn read_file_content(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Current size of a file in bytes.
pub fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| Error::io(path, e))
}

/// Result of reading a file from a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRead {
    /// Text between the start offset and `new_position`
    pub content: String,
    /// Offset to pass to the next read
    pub new_position: u64,
    /// The file had shrunk below `last_position`; reading restarted at 0
    pub truncated: bool,
}

/// Read only what was appended since `last_position`.
///
/// If the file is now smaller than `last_position` it was truncated or
/// rotated, and the read restarts from offset 0. A multi-byte character cut
/// off at the end of the file is left for the next read.
pub fn read_new_content(path: &Path, last_position: u64) -> Result<TailRead> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let size = file.metadata().map_err(|e| Error::io(path, e))?.len();

    let truncated = size < last_position;
    let start = if truncated {
        tracing::info!(
            path = %path.display(),
            last_position,
            size,
            "Log file shrank, restarting from the beginning"
        );
        0
    } else {
        last_position
    };

    if start == size {
        return Ok(TailRead {
            content: String::new(),
            new_position: size,
            truncated,
        });
    }

    file.seek(SeekFrom::Start(start))
        .map_err(|e| Error::io(path, e))?;
    let mut buf = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut buf).map_err(|e| Error::io(path, e))?;

    let (content, consumed) = match std::str::from_utf8(&buf) {
        Ok(s) => (s.to_string(), buf.len()),
        Err(e) if e.error_len().is_none() => (
            String::from_utf8_lossy(&buf[..e.valid_up_to()]).into_owned(),
            e.valid_up_to(),
        ),
        Err(_) => (String::from_utf8_lossy(&buf).into_owned(), buf.len()),
    };

    Ok(TailRead {
        content,
        new_position: start + consumed as u64,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const BLOCK: &str = "2025-01-10 10:00:00.100 [info] message 1 returned. finish reason: [stop]\n\
2025-01-10 10:00:00.110 [info] request done: requestId: [abc123] model deployment ID: [dep1]\n\
2025-01-10 10:00:00.120 [info] ccreq:xyz | success | gpt-4 | 500ms | [ctx]\n";

    fn naive(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.3f").unwrap()
    }

    #[test]
    fn test_parse_timestamp_valid() {
        let ts = parse_timestamp("2025-01-10 10:00:00.120").unwrap();
        assert_eq!(
            ts.with_timezone(&Local).naive_local(),
            naive("2025-01-10 10:00:00.120")
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_other_formats() {
        for bad in ["", "...", "2025-01-10T10:00:00Z", "10/01/2025 10:00", "2025-13-40 99:00:00.000"] {
            let err = parse_timestamp(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidFormat { .. }), "{bad}");
        }
    }

    #[test]
    fn test_parse_multi_line_single_block() {
        let entries = parse_multi_line_requests(BLOCK);
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.request_id, "abc123");
        assert_eq!(entry.status, LogStatus::Success);
        assert_eq!(entry.model_name, "gpt-4");
        assert_eq!(entry.response_time, 500);
        assert_eq!(entry.finish_reason, "stop");
        assert_eq!(entry.context, "ctx");
        assert_eq!(entry.ccreq_id, "xyz");
        assert_eq!(entry.deployment_id, "dep1");
        assert_eq!(
            entry.timestamp.with_timezone(&Local).naive_local(),
            naive("2025-01-10 10:00:00.120")
        );
        assert!(entry.raw.starts_with("2025-01-10 10:00:00.100"));
    }

    #[test]
    fn test_parse_multi_line_ignores_unrelated_lines() {
        let content = format!(
            "2025-01-10 09:59:59.000 [info] Logged in\n{}2025-01-10 10:00:01.000 [warning] something else\n{}",
            BLOCK,
            BLOCK.replace("abc123", "def456").replace("| success |", "| error |")
        );
        let entries = parse_multi_line_requests(&content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request_id, "abc123");
        assert_eq!(entries[1].request_id, "def456");
        assert_eq!(entries[1].status, LogStatus::Error);
    }

    #[test]
    fn test_parse_multi_line_requires_contiguous_lines() {
        let mut lines: Vec<&str> = BLOCK.lines().collect();
        lines.insert(1, "2025-01-10 10:00:00.105 [info] unrelated");
        let content = lines.join("\n");
        assert!(parse_multi_line_requests(&content).is_empty());
    }

    #[test]
    fn test_bad_block_dropped_without_aborting() {
        let bad_duration = BLOCK.replace("500ms", "fastms");
        let bad_timestamp = BLOCK.replace("2025-01-10 10:00:00.120", "not-a-time");
        let good = BLOCK.replace("abc123", "good");
        let content = format!("{bad_duration}{bad_timestamp}{good}");

        let blocks = scan_request_blocks(&content);
        assert_eq!(blocks.entries.len(), 1);
        assert_eq!(blocks.entries[0].request_id, "good");
        assert_eq!(blocks.dropped, 2);
        assert_eq!(blocks.consumed, content.trim_end().len());
    }

    #[test]
    fn test_crlf_line_endings() {
        let content = BLOCK.replace('\n', "\r\n");
        let entries = parse_multi_line_requests(&content);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response_time, 500);
    }

    #[test]
    fn test_read_new_content_appended_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        std::fs::write(&path, "first line of the log\n").unwrap();

        let full = read_file_content(&path).unwrap();
        let n = file_size(&path).unwrap();
        assert_eq!(full.len() as u64, n);

        let appended = "x".repeat(49) + "\n";
        assert_eq!(appended.len(), 50);
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(appended.as_bytes()).unwrap();
        drop(f);

        let tail = read_new_content(&path, n).unwrap();
        assert_eq!(tail.content, appended);
        assert_eq!(tail.new_position, n + 50);
        assert!(!tail.truncated);

        let again = read_new_content(&path, tail.new_position).unwrap();
        assert!(again.content.is_empty());
        assert_eq!(again.new_position, n + 50);
    }

    #[test]
    fn test_read_new_content_after_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        std::fs::write(&path, "a fairly long first generation of the log\n").unwrap();
        let n = file_size(&path).unwrap();

        std::fs::write(&path, "short\n").unwrap();
        let tail = read_new_content(&path, n).unwrap();
        assert!(tail.truncated);
        assert_eq!(tail.content, "short\n");
        assert_eq!(tail.new_position, 6);
    }

    #[test]
    fn test_read_new_content_holds_back_split_character() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log");
        let bytes = "ok é".as_bytes();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let tail = read_new_content(&path, 0).unwrap();
        assert_eq!(tail.content, "ok ");
        assert_eq!(tail.new_position, 3);
    }

    #[test]
    fn test_missing_file_is_typed_io_error() {
        let err = read_new_content(Path::new("/definitely/not/here.log"), 0).unwrap_err();
        match err {
            Error::Io { path, .. } => assert!(path.ends_with("here.log")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
