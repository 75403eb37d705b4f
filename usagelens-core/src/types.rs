//! Core domain types for usagelens
//!
//! These types represent the normalized data model that all three sources
//! (chat sessions, edit-state timelines, request logs) are folded into.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Storage root** | A host edition's `workspaceStorage` directory |
//! | **Workspace** | One `<workspaceHash>` directory beneath a storage root |
//! | **Chat session** | One `chatSessions/*.json` document; its `requests` are turns |
//! | **Edit-state session** | One `chatEditingSessions/<id>/state.json` timeline |
//! | **Log entry** | One matched three-line block from a request log |
//! | **Usage event** | The merged, deduplicated record analytics runs on |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

// ============================================
// Usage events
// ============================================

/// What kind of interaction produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Chat,
    Completion,
    Edit,
    Explain,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Chat => "chat",
            EventType::Completion => "completion",
            EventType::Edit => "edit",
            EventType::Explain => "explain",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which surface of the host produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    ChatPanel,
    InlineCompletion,
    Sidebar,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::ChatPanel => "chat-panel",
            EventSource::InlineCompletion => "inline-completion",
            EventSource::Sidebar => "sidebar",
        }
    }
}

/// Where a record came from and which tool produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// File the record was read from
    pub source_file: Option<PathBuf>,
    /// Schema version declared by the source document, if any
    pub schema_version: Option<u32>,
    /// Version of usagelens that produced the record
    pub tool_version: String,
}

impl Provenance {
    pub fn from_file(path: PathBuf, schema_version: Option<u32>) -> Self {
        Self {
            source_file: Some(path),
            schema_version,
            ..Self::current()
        }
    }

    /// Provenance with only the tool version set.
    pub fn current() -> Self {
        Self {
            source_file: None,
            schema_version: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Process-level identity stamped on events whose source file does not
/// carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// Host process session
    pub vscode_session_id: String,
    /// Extension host session
    pub extension_host_session_id: String,
}

impl HostIdentity {
    /// Use `session_id` for both ids, or generate a fresh UUID.
    pub fn new(session_id: Option<String>) -> Self {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            vscode_session_id: id.clone(),
            extension_host_session_id: id,
        }
    }
}

/// The canonical normalized record.
///
/// `id` is derived from source fields only (never from the timestamp), so
/// re-scanning an unchanged file yields the same ids and merges collapse
/// repeated observations of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotUsageEvent {
    /// Dedup key
    pub id: String,
    /// When the interaction happened; drives all windowing
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: EventSource,
    /// Agent id (e.g. `github.copilot.editsAgent`)
    pub agent: Option<String>,
    /// Raw mode labels, passed through
    #[serde(default)]
    pub modes: Vec<String>,

    // Session hierarchy
    pub vscode_session_id: String,
    pub window_id: Option<String>,
    pub extension_host_session_id: String,
    /// `<workspace>/<chat session>` for chat events, the log session otherwise
    pub session_id: String,
    pub workspace_id: Option<String>,
    pub request_id: Option<String>,

    // Measurements
    pub duration_ms: Option<u64>,
    pub tokens_used: Option<u64>,
    pub model: Option<String>,

    // Correlation (set by the merge, never by a scanner)
    pub is_in_edit: bool,
    /// Distinct files the edit-state timeline records for this request
    #[serde(default)]
    pub files_modified: u32,

    // Context
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub user_prompt: Option<String>,

    pub provenance: Provenance,
}

impl CopilotUsageEvent {
    /// Deterministic id: first 16 hex chars of SHA-256 over the parts.
    pub fn derive_id(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        let hash = hasher.finalize();
        hex::encode(&hash[..8])
    }

    /// Request id with the chat `request_` prefix removed.
    pub fn normalized_request_id(&self) -> Option<&str> {
        self.request_id.as_deref().map(normalize_request_id)
    }
}

/// Chat sessions prefix request ids with `request_`; logs do not.
pub fn normalize_request_id(id: &str) -> &str {
    id.strip_prefix("request_").unwrap_or(id)
}

// ============================================
// Request logs
// ============================================

/// Outcome reported on a `ccreq` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    /// Anything but `success` counts as an error.
    pub fn from_log(s: &str) -> Self {
        if s.eq_ignore_ascii_case("success") {
            LogStatus::Success
        } else {
            LogStatus::Error
        }
    }
}

/// One matched three-line request block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Timestamp of the `ccreq` line
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub model_name: String,
    /// Milliseconds
    pub response_time: u64,
    pub status: LogStatus,
    pub finish_reason: String,
    pub context: String,
    pub ccreq_id: String,
    pub deployment_id: String,
    /// `window<N>` directory the log lives in
    pub window_id: Option<String>,
    /// Session-stamp directory above the window directory
    pub log_session_id: Option<String>,
    /// The matched text
    pub raw: String,
}

// ============================================
// Edit-state timelines
// ============================================

/// Untyped fields kept alongside the typed core of a record
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

/// A `state.json` document. Only the core is typed; unknown fields survive
/// in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStateFile {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub linear_history: Vec<EditStateTurn>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One entry of `linearHistory`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStateTurn {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stops: Vec<EditStop>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl EditStateTurn {
    /// Distinct resources touched across all stops of this turn.
    pub fn touched_resources(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for entry in self.stops.iter().flat_map(|s| s.entries.iter()) {
            if let Some(resource) = entry.resource.as_deref() {
                if !seen.contains(&resource) {
                    seen.push(resource);
                }
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditStop {
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<EditEntry>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One parsed `state.json` plus file metadata
#[derive(Debug, Clone, PartialEq)]
pub struct EditStateScanResult {
    pub session_id: String,
    pub file: EditStateFile,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl EditStateScanResult {
    /// Request ids in history order, duplicates kept.
    pub fn session_requests(&self) -> EditStateSessionRequests {
        let mut requests = Vec::new();
        let mut files_modified = Vec::new();
        for turn in &self.file.linear_history {
            if let Some(id) = turn.request_id.as_deref() {
                requests.push(id.to_string());
                files_modified.push(turn.touched_resources().len() as u32);
            }
        }
        EditStateSessionRequests {
            session_id: self.session_id.clone(),
            requests,
            files_modified,
        }
    }
}

/// Ordered request ids of one edit-state session.
///
/// Not a set: a request appearing twice is counted twice by correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStateSessionRequests {
    pub session_id: String,
    pub requests: Vec<String>,
    /// Distinct resources per entry of `requests` (same length)
    pub files_modified: Vec<u32>,
}

// ============================================
// Scan statistics
// ============================================

/// Per-scanner observability counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub total_files: usize,
    pub error_files: usize,
    /// Turns for session scanners, entries for the log scanner
    pub total_turns: usize,
    /// Records inside readable files that failed to decode and were skipped
    pub dropped_records: usize,
    pub scan_duration_ms: u64,
}

/// Accept `null` wherever a list is expected.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
