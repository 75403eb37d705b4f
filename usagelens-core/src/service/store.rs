//! The merged event collection and its join rules.
//!
//! Everything here is synchronous and free of I/O. The service holds the
//! store behind a mutex and calls these methods at its merge points.
//!
//! ## Join rules
//!
//! - Chat events are keyed by their derived id; a later write of the same id
//!   replaces the earlier one.
//! - A log entry whose request id matches a chat event fills that event's
//!   missing model and duration. Entries are applied in read order and only
//!   fill empty fields, so the first entry carrying a value wins, whichever
//!   path does the join. Otherwise it becomes a log-only event keyed by the
//!   request id. When the chat event shows up later, it replaces the
//!   log-only one.
//! - `is_in_edit` and `files_modified` are recomputed from the edit-state
//!   sequences whenever either side changes.

use crate::types::{
    normalize_request_id, CopilotUsageEvent, EditStateSessionRequests, EventSource, EventType,
    HostIdentity, LogEntry, Provenance,
};
use std::collections::{HashMap, HashSet};

/// Source tag hashed into log-only event ids
const LOG_SOURCE_TAG: &str = "request-log";

/// How a request shows up across all edit-state timelines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditCorrelation {
    /// Times the request appears (duplicates counted)
    pub occurrences: u32,
    /// Distinct resources summed over every occurrence
    pub files_modified: u32,
}

/// Events that changed or disappeared in one merge step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventsDelta {
    pub changed: Vec<CopilotUsageEvent>,
    /// Ids that are no longer in the collection
    pub removed: Vec<String>,
}

impl EventsDelta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// The deduplicated event collection plus the inputs needed to re-join it.
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<String, CopilotUsageEvent>,
    edit_sessions: HashMap<String, EditStateSessionRequests>,
    log_entries: Vec<LogEntry>,
    seen_log_entries: HashSet<(String, String, i64)>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with the output of a full scan.
    pub fn rebuild(
        &mut self,
        chat_events: Vec<CopilotUsageEvent>,
        edit_sessions: Vec<EditStateSessionRequests>,
        log_entries: Vec<LogEntry>,
        host: &HostIdentity,
    ) {
        self.clear();
        for session in edit_sessions {
            self.edit_sessions.insert(session.session_id.clone(), session);
        }
        for event in chat_events {
            self.events.insert(event.id.clone(), event);
        }
        let fresh = self.remember_log_entries(log_entries);
        self.join_log_entries(&fresh, host);

        let index = self.edit_index();
        for event in self.events.values_mut() {
            apply_edit_correlation(event, &index);
        }
    }

    /// Upsert the events of one re-parsed chat session.
    pub fn apply_chat_events(&mut self, chat_events: Vec<CopilotUsageEvent>) -> EventsDelta {
        let index = self.edit_index();
        let by_request = entries_by_request(&self.log_entries);
        let mut delta = EventsDelta::default();

        for mut event in chat_events {
            if let Some(request) = event.normalized_request_id().map(str::to_string) {
                let log_id = log_event_id(&request);
                if log_id != event.id && self.events.remove(&log_id).is_some() {
                    delta.removed.push(log_id);
                }
                for entry in by_request.get(request.as_str()).into_iter().flatten() {
                    enrich_from_log(&mut event, entry);
                }
            }
            apply_edit_correlation(&mut event, &index);

            if self.events.get(&event.id) != Some(&event) {
                self.events.insert(event.id.clone(), event.clone());
                delta.changed.push(event);
            }
        }

        delta
    }

    /// Replace one edit-state session's sequence and re-correlate the
    /// requests it mentions (before and after).
    pub fn apply_edit_session(&mut self, session: EditStateSessionRequests) -> EventsDelta {
        let mut affected: HashSet<String> = session
            .requests
            .iter()
            .map(|r| normalize_request_id(r).to_string())
            .collect();
        if let Some(previous) = self
            .edit_sessions
            .insert(session.session_id.clone(), session)
        {
            affected.extend(
                previous
                    .requests
                    .iter()
                    .map(|r| normalize_request_id(r).to_string()),
            );
        }

        let index = self.edit_index();
        let mut delta = EventsDelta::default();
        for event in self.events.values_mut() {
            let touched = event
                .normalized_request_id()
                .is_some_and(|r| affected.contains(r));
            if touched && apply_edit_correlation(event, &index) {
                delta.changed.push(event.clone());
            }
        }
        delta
    }

    /// Merge newly read log entries. Returns the event delta and the entries
    /// that were not already known.
    pub fn apply_log_entries(
        &mut self,
        entries: Vec<LogEntry>,
        host: &HostIdentity,
    ) -> (EventsDelta, Vec<LogEntry>) {
        let fresh = self.remember_log_entries(entries);
        let changed_ids = self.join_log_entries(&fresh, host);

        let index = self.edit_index();
        let mut delta = EventsDelta::default();
        for id in changed_ids {
            if let Some(event) = self.events.get_mut(&id) {
                apply_edit_correlation(event, &index);
                delta.changed.push(event.clone());
            }
        }
        (delta, fresh)
    }

    /// Events sorted by timestamp, ties by id.
    pub fn sorted_events(&self) -> Vec<CopilotUsageEvent> {
        let mut events: Vec<CopilotUsageEvent> = self.events.values().cloned().collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        events
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    /// Edit-state sequences sorted by session id.
    pub fn edit_sessions(&self) -> Vec<EditStateSessionRequests> {
        let mut sessions: Vec<EditStateSessionRequests> =
            self.edit_sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.edit_sessions.clear();
        self.log_entries.clear();
        self.seen_log_entries.clear();
    }

    /// Request id -> correlation across every edit-state session.
    pub fn edit_index(&self) -> HashMap<String, EditCorrelation> {
        let mut index: HashMap<String, EditCorrelation> = HashMap::new();
        for session in self.edit_sessions.values() {
            for (i, request) in session.requests.iter().enumerate() {
                let slot = index
                    .entry(normalize_request_id(request).to_string())
                    .or_default();
                slot.occurrences += 1;
                slot.files_modified += session.files_modified.get(i).copied().unwrap_or(0);
            }
        }
        index
    }

    /// Keep entries not seen before, in order.
    fn remember_log_entries(&mut self, entries: Vec<LogEntry>) -> Vec<LogEntry> {
        let mut fresh = Vec::new();
        for entry in entries {
            let key = (
                entry.ccreq_id.clone(),
                entry.request_id.clone(),
                entry.timestamp.timestamp_millis(),
            );
            if self.seen_log_entries.insert(key) {
                self.log_entries.push(entry.clone());
                fresh.push(entry);
            }
        }
        fresh
    }

    /// Enrich chat events or create log-only events. Returns touched ids.
    fn join_log_entries(&mut self, entries: &[LogEntry], host: &HostIdentity) -> Vec<String> {
        let chat_by_request: HashMap<String, String> = self
            .events
            .values()
            .filter(|e| e.source == EventSource::ChatPanel)
            .filter_map(|e| Some((e.normalized_request_id()?.to_string(), e.id.clone())))
            .collect();

        let mut touched = Vec::new();
        for entry in entries {
            let request = normalize_request_id(&entry.request_id);
            match chat_by_request.get(request) {
                Some(id) => {
                    if let Some(event) = self.events.get_mut(id) {
                        if enrich_from_log(event, entry) {
                            touched.push(id.clone());
                        }
                    }
                }
                None => {
                    let event = log_event(entry, host);
                    touched.push(event.id.clone());
                    self.events.insert(event.id.clone(), event);
                }
            }
        }
        touched.sort();
        touched.dedup();
        touched
    }
}

/// Log entries per normalized request id, in read order.
fn entries_by_request(entries: &[LogEntry]) -> HashMap<&str, Vec<&LogEntry>> {
    let mut by_request: HashMap<&str, Vec<&LogEntry>> = HashMap::new();
    for entry in entries {
        by_request
            .entry(normalize_request_id(&entry.request_id))
            .or_default()
            .push(entry);
    }
    by_request
}

/// Id of the event a log entry produces when no chat event matches.
pub fn log_event_id(request_id: &str) -> String {
    CopilotUsageEvent::derive_id(&[LOG_SOURCE_TAG, normalize_request_id(request_id)])
}

/// Build a log-only event.
pub fn log_event(entry: &LogEntry, host: &HostIdentity) -> CopilotUsageEvent {
    let inline = entry.context.to_ascii_lowercase().contains("inline");
    let (event_type, source) = if inline {
        (EventType::Completion, EventSource::InlineCompletion)
    } else {
        (EventType::Chat, EventSource::Sidebar)
    };
    let process_session = entry
        .log_session_id
        .clone()
        .unwrap_or_else(|| host.vscode_session_id.clone());

    CopilotUsageEvent {
        id: log_event_id(&entry.request_id),
        timestamp: entry.timestamp,
        event_type,
        source,
        agent: None,
        modes: Vec::new(),
        vscode_session_id: process_session.clone(),
        window_id: entry.window_id.clone(),
        extension_host_session_id: host.extension_host_session_id.clone(),
        session_id: process_session,
        workspace_id: None,
        request_id: Some(entry.request_id.clone()),
        duration_ms: Some(entry.response_time),
        tokens_used: None,
        model: Some(entry.model_name.clone()).filter(|m| !m.is_empty()),
        is_in_edit: false,
        files_modified: 0,
        language: None,
        file_path: None,
        user_prompt: None,
        provenance: Provenance::current(),
    }
}

/// Fill what the chat event is missing from its log entry.
fn enrich_from_log(event: &mut CopilotUsageEvent, entry: &LogEntry) -> bool {
    let mut changed = false;
    if event.model.is_none() && !entry.model_name.is_empty() {
        event.model = Some(entry.model_name.clone());
        changed = true;
    }
    if event.duration_ms.is_none() {
        event.duration_ms = Some(entry.response_time);
        changed = true;
    }
    if event.window_id.is_none() && entry.window_id.is_some() {
        event.window_id = entry.window_id.clone();
        changed = true;
    }
    changed
}

/// Set the correlation fields from the index. Returns whether they changed.
fn apply_edit_correlation(
    event: &mut CopilotUsageEvent,
    index: &HashMap<String, EditCorrelation>,
) -> bool {
    let correlation = event
        .normalized_request_id()
        .and_then(|r| index.get(r))
        .copied()
        .unwrap_or_default();
    let is_in_edit = correlation.occurrences > 0;
    let changed =
        event.is_in_edit != is_in_edit || event.files_modified != correlation.files_modified;
    event.is_in_edit = is_in_edit;
    event.files_modified = correlation.files_modified;
    changed
}
