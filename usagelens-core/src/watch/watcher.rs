//! Filesystem change notifications filtered by a glob.

use crate::error::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// `*` and `?` stop at path separators, as in directory discovery; only
/// `**` crosses them.
const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether a changed path belongs to the watched set.
pub fn path_matches(pattern: &glob::Pattern, path: &Path) -> bool {
    pattern.matches_path_with(path, MATCH_OPTIONS)
}

/// Recursive watcher over a set of roots.
///
/// Create/modify events whose path matches `pattern` are forwarded over the
/// channel. Dropping the value stops watching.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    /// Watch every existing root. Fails if none could be watched.
    pub fn start(
        roots: &[PathBuf],
        pattern: glob::Pattern,
        tx: UnboundedSender<PathBuf>,
    ) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if path_matches(&pattern, &path) {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "File watcher error");
            }
        })?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                tracing::debug!(root = %root.display(), "Watch root missing, skipping");
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => watched.push(root.clone()),
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Failed to watch root");
                }
            }
        }

        if watched.is_empty() {
            return Err(Error::Watch(format!(
                "none of the roots could be watched: {:?}",
                roots
            )));
        }

        tracing::info!(roots = ?watched, "Watching for changes");

        Ok(Self {
            _watcher: watcher,
            roots: watched,
        })
    }

    /// Roots actually being watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_star_does_not_cross_directories() {
        let pattern = glob::Pattern::new("**/chatSessions/*.json").unwrap();
        assert!(path_matches(
            &pattern,
            Path::new("/data/ws1/chatSessions/s1.json")
        ));
        assert!(!path_matches(
            &pattern,
            Path::new("/data/ws1/chatSessions/backup/s1.json")
        ));

        let logs = glob::Pattern::new("**/window*/exthost/GitHub.copilot-chat/*.log").unwrap();
        assert!(path_matches(
            &logs,
            Path::new("/logs/20250110T100000/window1/exthost/GitHub.copilot-chat/GitHub Copilot Chat.log")
        ));
        assert!(!path_matches(
            &logs,
            Path::new("/logs/20250110T100000/window1/exthost/GitHub.copilot-chat/old/a.log")
        ));
    }

    #[test]
    fn test_no_existing_roots_is_an_error() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pattern = glob::Pattern::new("**/*.json").unwrap();
        let result = FileWatcher::start(&[PathBuf::from("/no/such/root")], pattern, tx);
        assert!(matches!(result, Err(Error::Watch(_))));
    }

    #[test]
    fn test_skips_missing_roots() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pattern = glob::Pattern::new("**/*.json").unwrap();
        let roots = vec![PathBuf::from("/no/such/root"), dir.path().to_path_buf()];

        let watcher = FileWatcher::start(&roots, pattern, tx).unwrap();
        assert_eq!(watcher.roots(), &[dir.path().to_path_buf()]);
    }
}
