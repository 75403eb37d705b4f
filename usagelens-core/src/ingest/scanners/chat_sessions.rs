//! Chat session scanner
//!
//! Reads `<storage root>/<workspace>/chatSessions/*.json`. Each document is
//! one chat session; each element of its `requests` array is one turn.
//!
//! ## Document Format
//!
//! ```json
//! {
//!   "version": 3,
//!   "sessionId": "4f0c...",
//!   "creationDate": 1736503200000,
//!   "requests": [
//!     {
//!       "requestId": "request_abc123",
//!       "timestamp": 1736503201000,
//!       "modelId": "copilot/gpt-4o",
//!       "agent": { "id": "github.copilot.editsAgent", "modes": ["edit"] },
//!       "message": { "text": "rename foo to bar" },
//!       "result": {
//!         "timings": { "totalElapsed": 2450 },
//!         "metadata": { "promptTokens": 900, "outputTokens": 120 }
//!       },
//!       "variableData": { "variables": [ { "value": { "uri": { "path": "/src/lib.rs" } } } ] }
//!     }
//!   ]
//! }
//! ```
//!
//! Individual turns that fail to decode are skipped and counted; the rest of
//! the session survives.

use crate::error::{Error, Result};
use crate::ingest::scanner::{FileMeta, SourcePattern, SourceScanner};
use crate::types::{
    CopilotUsageEvent, EventSource, EventType, ExtraFields, HostIdentity, Provenance, ScanStats,
};
use crate::watch::{Callback, FileHandler, ObserverId, WatchHub, WatchSpec};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Source tag hashed into chat event ids
const SOURCE_TAG: &str = "chat-session";

/// Default quiet period before a changed session file is re-read
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

// ============================================
// Raw document shapes
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSession {
    version: Option<u32>,
    session_id: Option<String>,
    creation_date: Option<i64>,
    requests: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRequest {
    request_id: Option<String>,
    timestamp: Option<i64>,
    model_id: Option<String>,
    agent: Option<RawAgent>,
    message: Option<RawMessage>,
    result: Option<RawResult>,
    variable_data: Option<RawVariableData>,
    #[serde(flatten)]
    extra: ExtraFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAgent {
    id: Option<String>,
    modes: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMessage {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawResult {
    timings: Option<RawTimings>,
    metadata: Option<RawResultMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTimings {
    total_elapsed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawResultMetadata {
    prompt_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVariableData {
    variables: Option<Vec<RawVariable>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVariable {
    value: Option<Value>,
}

// ============================================
// Parsed shapes
// ============================================

/// One decoded turn of a chat session
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    /// Position in the `requests` array
    pub index: usize,
    pub request_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub model_id: Option<String>,
    pub agent_id: Option<String>,
    pub modes: Vec<String>,
    pub prompt: Option<String>,
    pub duration_ms: Option<u64>,
    pub tokens_used: Option<u64>,
    /// First file referenced by the turn's variables
    pub file_path: Option<String>,
    pub extra: ExtraFields,
}

impl ChatTurn {
    /// Edit if the agent or a mode says so, explain for `/explain` prompts.
    pub fn event_type(&self) -> EventType {
        let agent_edits = self
            .agent_id
            .as_deref()
            .is_some_and(|a| a.to_ascii_lowercase().contains("edit"));
        let mode_edits = self
            .modes
            .iter()
            .any(|m| m.trim_start_matches('/').eq_ignore_ascii_case("edit"));

        if agent_edits || mode_edits {
            EventType::Edit
        } else if self
            .prompt
            .as_deref()
            .is_some_and(|p| p.trim_start().starts_with("/explain"))
        {
            EventType::Explain
        } else {
            EventType::Chat
        }
    }
}

/// One parsed chat session file
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSessionScanResult {
    pub session_id: String,
    /// Workspace directory name (the storage hash)
    pub workspace_id: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub schema_version: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub turns: Vec<ChatTurn>,
    /// Turns that failed to decode and were skipped
    pub malformed_turns: usize,
}

impl ChatSessionScanResult {
    /// Normalize every turn into a usage event.
    ///
    /// Correlation fields stay unset; the merge fills them. Turns with no
    /// timestamp and no session creation date are skipped.
    pub fn to_events(&self, host: &HostIdentity) -> Vec<CopilotUsageEvent> {
        let session_key = format!("{}/{}", self.workspace_id, self.session_id);
        let mut events = Vec::with_capacity(self.turns.len());

        for turn in &self.turns {
            let Some(timestamp) = turn.timestamp.or(self.created_at) else {
                tracing::debug!(
                    path = %self.path.display(),
                    turn = turn.index,
                    "Turn has no timestamp, skipping"
                );
                continue;
            };

            let turn_key = match turn.request_id.as_deref() {
                Some(id) => id.to_string(),
                None => format!("#{}", turn.index),
            };
            let id = CopilotUsageEvent::derive_id(&[
                SOURCE_TAG,
                &self.workspace_id,
                &self.session_id,
                &turn_key,
            ]);

            events.push(CopilotUsageEvent {
                id,
                timestamp,
                event_type: turn.event_type(),
                source: EventSource::ChatPanel,
                agent: turn.agent_id.clone(),
                modes: turn.modes.clone(),
                vscode_session_id: host.vscode_session_id.clone(),
                window_id: None,
                extension_host_session_id: host.extension_host_session_id.clone(),
                session_id: session_key.clone(),
                workspace_id: Some(self.workspace_id.clone()),
                request_id: turn.request_id.clone(),
                duration_ms: turn.duration_ms,
                tokens_used: turn.tokens_used,
                model: turn.model_id.clone(),
                is_in_edit: false,
                files_modified: 0,
                language: turn
                    .file_path
                    .as_deref()
                    .and_then(language_for_path)
                    .map(str::to_string),
                file_path: turn.file_path.clone(),
                user_prompt: turn.prompt.clone(),
                provenance: Provenance::from_file(self.path.clone(), self.schema_version),
            });
        }

        events
    }
}

/// Everything a full chat-session scan produced
#[derive(Debug, Clone, Default)]
pub struct ChatSessionScan {
    pub results: Vec<ChatSessionScanResult>,
    pub stats: ScanStats,
}

// ============================================
// Scanner
// ============================================

/// Scanner for `chatSessions/*.json`
pub struct ChatSessionScanner {
    roots: Vec<PathBuf>,
    debounce: Duration,
    max_retries: u32,
    watch: WatchHub<ChatSessionScanResult>,
}

impl ChatSessionScanner {
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

    /// Parse every session file under every root.
    pub fn scan_all(&self) -> Result<ChatSessionScan> {
        let (results, stats) = self.scan_files()?;
        Ok(ChatSessionScan { results, stats })
    }

    /// Re-parse changed session files and hand each result to `callback`.
    pub fn start_watching(&self, callback: Callback<ChatSessionScanResult>) -> Result<ObserverId> {
        let spec = WatchSpec {
            roots: self.roots.clone(),
            pattern: self.source_pattern().compiled_watch_pattern()?,
            debounce: self.debounce,
            max_retries: self.max_retries,
        };
        let handler: FileHandler<ChatSessionScanResult> = Arc::new(parse_session_file);
        self.watch.start(&spec, handler, callback)
    }

    pub fn stop_watching(&self) {
        self.watch.stop();
    }

    pub fn watch_hub(&self) -> &WatchHub<ChatSessionScanResult> {
        &self.watch
    }
}

impl SourceScanner for ChatSessionScanner {
    type Output = ChatSessionScanResult;

    fn name(&self) -> &'static str {
        "chat-sessions"
    }

    fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn source_pattern(&self) -> SourcePattern {
        SourcePattern {
            pattern: "*/chatSessions/*.json".to_string(),
            watch_pattern: "**/chatSessions/*.json".to_string(),
            description: "Chat session documents".to_string(),
        }
    }

    fn parse_file(&self, path: &Path) -> Option<ChatSessionScanResult> {
        parse_session_file(path)
    }

    fn record_count(output: &ChatSessionScanResult) -> usize {
        output.turns.len()
    }

    fn dropped_count(output: &ChatSessionScanResult) -> usize {
        output.malformed_turns
    }
}

/// Read and decode one session file, logging the reason on failure.
pub fn parse_session_file(path: &Path) -> Option<ChatSessionScanResult> {
    let result = FileMeta::read(path).and_then(|meta| {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        parse_session_document(path, &text, meta)
    });

    match result {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse chat session");
            None
        }
    }
}

/// Decode a session document that has already been read.
pub fn parse_session_document(
    path: &Path,
    text: &str,
    meta: FileMeta,
) -> Result<ChatSessionScanResult> {
    let raw: RawSession = serde_json::from_str(text)?;

    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let session_id = raw.session_id.unwrap_or(file_stem);
    let workspace_id = workspace_of(path).unwrap_or_else(|| "unknown".to_string());

    let created_at = raw.creation_date.and_then(DateTime::from_timestamp_millis);
    let mut turns = Vec::new();
    let mut malformed_turns = 0;
    for (index, value) in raw.requests.unwrap_or_default().into_iter().enumerate() {
        match serde_json::from_value::<RawRequest>(value) {
            Ok(request) if request.timestamp.is_none() && created_at.is_none() => {
                malformed_turns += 1;
                tracing::debug!(path = %path.display(), index, "Skipping turn without any timestamp");
            }
            Ok(request) => turns.push(turn_from_raw(index, request)),
            Err(e) => {
                malformed_turns += 1;
                tracing::debug!(path = %path.display(), index, error = %e, "Skipping malformed turn");
            }
        }
    }

    Ok(ChatSessionScanResult {
        session_id,
        workspace_id,
        path: path.to_path_buf(),
        modified_at: meta.modified_at,
        size_bytes: meta.size_bytes,
        schema_version: raw.version,
        created_at,
        turns,
        malformed_turns,
    })
}

fn turn_from_raw(index: usize, raw: RawRequest) -> ChatTurn {
    let (agent_id, modes) = match raw.agent {
        Some(agent) => (
            agent.id,
            agent
                .modes
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.as_str().map(str::to_string))
                .collect(),
        ),
        None => (None, Vec::new()),
    };

    let (duration_ms, tokens_used) = match raw.result {
        Some(result) => {
            let duration = result.timings.and_then(|t| t.total_elapsed);
            let tokens = result.metadata.and_then(|m| match (m.prompt_tokens, m.output_tokens) {
                (None, None) => None,
                (p, o) => Some(p.unwrap_or(0) + o.unwrap_or(0)),
            });
            (duration, tokens)
        }
        None => (None, None),
    };

    let file_path = raw
        .variable_data
        .and_then(|v| v.variables)
        .unwrap_or_default()
        .iter()
        .find_map(|var| var.value.as_ref().and_then(path_from_variable));

    ChatTurn {
        index,
        request_id: raw.request_id,
        timestamp: raw.timestamp.and_then(DateTime::from_timestamp_millis),
        model_id: raw.model_id,
        agent_id,
        modes,
        prompt: raw.message.and_then(|m| m.text),
        duration_ms,
        tokens_used,
        file_path,
        extra: raw.extra,
    }
}

/// Pull a filesystem path out of a variable value (`uri.path`, `fsPath`,
/// or a `file://` string).
fn path_from_variable(value: &Value) -> Option<String> {
    if let Some(text) = value.as_str() {
        return text.strip_prefix("file://").map(str::to_string);
    }
    let uri = value.get("uri").unwrap_or(value);
    ["fsPath", "path"]
        .iter()
        .find_map(|key| uri.get(*key).and_then(Value::as_str))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// `<root>/<workspace>/chatSessions/<file>` yields `<workspace>`.
fn workspace_of(path: &Path) -> Option<String> {
    path.parent()?
        .parent()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Language id for a file path, by extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sh" | "bash" | "zsh" => "shellscript",
        "sql" => "sql",
        "vue" => "vue",
        _ => return None,
    };
    Some(language)
}
