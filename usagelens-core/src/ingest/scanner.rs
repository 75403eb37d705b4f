//! Scanner trait abstraction
//!
//! Each source (chat sessions, edit-state timelines, request logs) has a
//! scanner implementing [`SourceScanner`], which gives a uniform way to find
//! and parse its files.
//!
//! ## Design Principles
//!
//! 1. **Tolerance**: a missing root or unreadable file is logged and skipped
//! 2. **Isolation**: one bad file never fails the scan of the others
//! 3. **Honest counters**: every skipped file shows up in [`ScanStats`]

use crate::error::{Error, Result};
use crate::types::ScanStats;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Where a scanner looks for its files.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    /// Glob relative to each root (e.g. `*/chatSessions/*.json`)
    pub pattern: String,
    /// Glob matched against absolute paths by the watcher
    pub watch_pattern: String,
    /// Human-readable description for logging
    pub description: String,
}

impl SourcePattern {
    pub fn compiled_watch_pattern(&self) -> Result<glob::Pattern> {
        glob::Pattern::new(&self.watch_pattern).map_err(|e| Error::InvalidFormat {
            input: self.watch_pattern.clone(),
            expected: format!("glob pattern ({e})"),
        })
    }
}

/// Size and modification time of a file, read once per parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

impl FileMeta {
    pub fn read(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        let modified_at = metadata
            .modified()
            .ok()
            .map(DateTime::from)
            .unwrap_or_else(Utc::now);
        Ok(Self {
            size_bytes: metadata.len(),
            modified_at,
        })
    }
}

/// Trait implemented by every source scanner.
pub trait SourceScanner: Send + Sync {
    /// What one parsed file becomes
    type Output;

    /// Short name for logs and stats
    fn name(&self) -> &'static str;

    /// Directories this scanner searches
    fn roots(&self) -> &[PathBuf];

    fn source_pattern(&self) -> SourcePattern;

    /// Parse one file. `None` if it could not be read or decoded; the reason
    /// is logged.
    fn parse_file(&self, path: &Path) -> Option<Self::Output>;

    /// Records contained in a parsed file, for [`ScanStats::total_turns`].
    fn record_count(output: &Self::Output) -> usize;

    /// Records inside a parsed file that were skipped as malformed, for
    /// [`ScanStats::dropped_records`].
    fn dropped_count(_output: &Self::Output) -> usize {
        0
    }

    /// Find every file matching [`Self::source_pattern`] under every root.
    ///
    /// Missing roots are skipped with a log line. Fails with
    /// [`Error::StorageRootsUnavailable`] only when no root exists at all.
    fn find_all_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.source_pattern();
        let mut files = Vec::new();
        let mut available = 0usize;

        for root in self.roots() {
            if !root.is_dir() {
                tracing::debug!(
                    scanner = self.name(),
                    root = %root.display(),
                    "Root not found, skipping"
                );
                continue;
            }
            available += 1;

            let full_pattern = root.join(&pattern.pattern);
            let pattern_str = full_pattern.to_string_lossy();
            let entries = match glob::glob(&pattern_str) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        scanner = self.name(),
                        pattern = %pattern_str,
                        error = %e,
                        "Invalid glob pattern"
                    );
                    continue;
                }
            };

            for entry in entries {
                match entry {
                    Ok(path) => files.push(path),
                    Err(e) => {
                        tracing::warn!(scanner = self.name(), error = %e, "Unreadable path under root");
                    }
                }
            }
        }

        if available == 0 {
            return Err(Error::StorageRootsUnavailable(format!(
                "{}: none of {:?} exist",
                self.name(),
                self.roots()
            )));
        }

        files.sort();
        tracing::debug!(
            scanner = self.name(),
            description = %pattern.description,
            files = files.len(),
            "Discovered files"
        );
        Ok(files)
    }

    /// Parse every discovered file, counting failures instead of failing.
    fn scan_files(&self) -> Result<(Vec<Self::Output>, ScanStats)> {
        let started = Instant::now();
        let files = self.find_all_files()?;
        let mut stats = ScanStats {
            total_files: files.len(),
            ..Default::default()
        };
        let mut outputs = Vec::with_capacity(files.len());

        for path in &files {
            match self.parse_file(path) {
                Some(output) => {
                    stats.total_turns += Self::record_count(&output);
                    stats.dropped_records += Self::dropped_count(&output);
                    outputs.push(output);
                }
                None => stats.error_files += 1,
            }
        }

        stats.scan_duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            scanner = self.name(),
            files = stats.total_files,
            errors = stats.error_files,
            records = stats.total_turns,
            dropped = stats.dropped_records,
            duration_ms = stats.scan_duration_ms,
            "Scan complete"
        );
        Ok((outputs, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct TextScanner {
        roots: Vec<PathBuf>,
    }

    impl SourceScanner for TextScanner {
        type Output = String;

        fn name(&self) -> &'static str {
            "text"
        }

        fn roots(&self) -> &[PathBuf] {
            &self.roots
        }

        fn source_pattern(&self) -> SourcePattern {
            SourcePattern {
                pattern: "*/notes/*.txt".to_string(),
                watch_pattern: "**/notes/*.txt".to_string(),
                description: "test notes".to_string(),
            }
        }

        fn parse_file(&self, path: &Path) -> Option<String> {
            let text = fs::read_to_string(path).ok()?;
            (!text.starts_with("bad")).then_some(text)
        }

        fn record_count(output: &String) -> usize {
            output.lines().count()
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_roots_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ws1/notes/a.txt", "one\ntwo");
        write(dir.path(), "ws2/notes/b.txt", "three");
        write(dir.path(), "ws2/other/c.txt", "ignored");

        let scanner = TextScanner {
            roots: vec![PathBuf::from("/no/such/root"), dir.path().to_path_buf()],
        };
        let files = scanner.find_all_files().unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_no_roots_at_all_is_an_error() {
        let scanner = TextScanner {
            roots: vec![PathBuf::from("/no/such/root")],
        };
        assert!(matches!(
            scanner.find_all_files(),
            Err(Error::StorageRootsUnavailable(_))
        ));
    }

    #[test]
    fn test_scan_counts_bad_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ws1/notes/a.txt", "one\ntwo");
        write(dir.path(), "ws1/notes/b.txt", "three");
        write(dir.path(), "ws1/notes/c.txt", "bad file");

        let scanner = TextScanner {
            roots: vec![dir.path().to_path_buf()],
        };
        let (outputs, stats) = scanner.scan_files().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.error_files, 1);
        assert_eq!(stats.total_turns, 3);
    }

    #[test]
    fn test_watch_pattern_matches_absolute_paths() {
        let scanner = TextScanner { roots: vec![] };
        let pattern = scanner.source_pattern().compiled_watch_pattern().unwrap();
        assert!(crate::watch::path_matches(
            &pattern,
            Path::new("/data/ws1/notes/a.txt")
        ));
        assert!(!crate::watch::path_matches(
            &pattern,
            Path::new("/data/ws1/other/a.txt")
        ));
        assert!(!crate::watch::path_matches(
            &pattern,
            Path::new("/data/ws1/notes/old/a.txt")
        ));
    }
}
