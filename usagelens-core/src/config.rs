//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/usagelens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/usagelens/` (~/.config/usagelens/)
//! - State/Logs: `$XDG_STATE_HOME/usagelens/` (~/.local/state/usagelens/)

use crate::analytics::TimeRange;
use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daily log files are named `<prefix>.<YYYY-MM-DD>.<suffix>`
pub const LOG_FILE_PREFIX: &str = "usagelens";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where to look for session, edit-state and log files
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Real-time file watching
    #[serde(default)]
    pub watch: WatchConfig,

    /// Analytics query defaults
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Host process identity
    #[serde(default)]
    pub host: HostConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discovery roots.
///
/// Empty root lists mean "use the platform defaults for every edition".
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Explicit workspace-storage roots
    #[serde(default)]
    pub storage_roots: Vec<PathBuf>,

    /// Explicit log roots
    #[serde(default)]
    pub log_roots: Vec<PathBuf>,

    /// Host editions to scan when no explicit roots are given
    #[serde(default = "default_editions")]
    pub editions: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            storage_roots: vec![],
            log_roots: vec![],
            editions: default_editions(),
        }
    }
}

fn default_editions() -> Vec<String> {
    vec!["Code".to_string(), "Code - Insiders".to_string()]
}

impl SourcesConfig {
    /// Workspace-storage roots to scan.
    pub fn resolved_storage_roots(&self) -> Vec<PathBuf> {
        if !self.storage_roots.is_empty() {
            return self.storage_roots.clone();
        }
        self.editions
            .iter()
            .filter_map(|edition| edition_user_dir(edition))
            .map(|user| user.join("workspaceStorage"))
            .collect()
    }

    /// Log roots to scan.
    pub fn resolved_log_roots(&self) -> Vec<PathBuf> {
        if !self.log_roots.is_empty() {
            return self.log_roots.clone();
        }
        self.editions
            .iter()
            .filter_map(|edition| edition_data_dir(edition))
            .map(|data| data.join("logs"))
            .collect()
    }
}

/// `<data dir>/<edition>` for the current platform.
fn edition_data_dir(edition: &str) -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        Some(home_dir().join("Library/Application Support").join(edition))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join(edition))
    }
}

/// `<data dir>/<edition>/User`
fn edition_user_dir(edition: &str) -> Option<PathBuf> {
    edition_data_dir(edition).map(|d| d.join("User"))
}

/// File watching configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Start watchers when the service is created
    #[serde(default = "default_watch_enabled")]
    pub enabled: bool,

    /// Debounce for chat session files
    #[serde(default = "default_session_debounce")]
    pub session_debounce_ms: u64,

    /// Debounce for edit-state files (rewritten often while editing)
    #[serde(default = "default_edit_state_debounce")]
    pub edit_state_debounce_ms: u64,

    /// Debounce for request logs
    #[serde(default = "default_log_debounce")]
    pub log_debounce_ms: u64,

    /// Re-parse attempts for a file caught mid-write
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_watch_enabled(),
            session_debounce_ms: default_session_debounce(),
            edit_state_debounce_ms: default_edit_state_debounce(),
            log_debounce_ms: default_log_debounce(),
            max_retries: default_max_retries(),
        }
    }
}

impl WatchConfig {
    pub fn session_debounce(&self) -> Duration {
        Duration::from_millis(self.session_debounce_ms)
    }

    pub fn edit_state_debounce(&self) -> Duration {
        Duration::from_millis(self.edit_state_debounce_ms)
    }

    pub fn log_debounce(&self) -> Duration {
        Duration::from_millis(self.log_debounce_ms)
    }
}

fn default_watch_enabled() -> bool {
    true
}

fn default_session_debounce() -> u64 {
    500
}

fn default_edit_state_debounce() -> u64 {
    2000
}

fn default_log_debounce() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

/// Analytics query defaults
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Range used when the caller does not pick one ("today", "7d", "30d", "90d", "all")
    #[serde(default = "default_range")]
    pub default_range: String,

    /// Length of top-N lists
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Length of the activity feed
    #[serde(default = "default_activity_limit")]
    pub activity_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_range: default_range(),
            top_n: default_top_n(),
            activity_limit: default_activity_limit(),
        }
    }
}

impl AnalyticsConfig {
    /// Parsed `default_range`.
    pub fn time_range(&self) -> Result<TimeRange> {
        self.default_range
            .parse()
            .map_err(|e: String| Error::Config(format!("analytics.default_range: {}", e)))
    }
}

fn default_range() -> String {
    "30d".to_string()
}

fn default_top_n() -> usize {
    10
}

fn default_activity_limit() -> usize {
    20
}

/// Host process identity
#[derive(Debug, Deserialize, Default, Clone)]
pub struct HostConfig {
    /// Process-level session id stamped on chat-derived events
    pub session_id: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service misbehave
    pub fn validate(&self) -> Result<()> {
        self.analytics.time_range()?;
        if self.analytics.top_n == 0 {
            return Err(Error::Config(
                "analytics.top_n must be at least 1".to_string(),
            ));
        }
        if self.watch.session_debounce_ms == 0
            || self.watch.edit_state_debounce_ms == 0
            || self.watch.log_debounce_ms == 0
        {
            return Err(Error::Config(
                "watch debounce windows must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/usagelens/config.toml` (~/.config/usagelens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("usagelens").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/usagelens/` (~/.local/state/usagelens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("usagelens")
    }

    /// Returns today's log file path
    ///
    /// `$XDG_STATE_HOME/usagelens/usagelens.<YYYY-MM-DD>.log`. Files roll
    /// over on the UTC date.
    pub fn log_path() -> PathBuf {
        Self::log_path_on(Utc::now().date_naive())
    }

    /// Log file written on `date`
    pub fn log_path_on(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }
}
