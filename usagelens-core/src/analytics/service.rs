//! In-memory index over usage events and the query surface on top of it.

use super::filter::{Filter, Window};
use super::stats::{
    median, preview, ratio, ActivityItem, AgentStat, Kpis, LangStat, ModelStat, TimeSeriesPoint,
};
use crate::types::CopilotUsageEvent;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Characters of the prompt shown in the activity feed
const PROMPT_PREVIEW_CHARS: usize = 80;

/// Indexed, queryable copy of the event collection.
///
/// Holds its own copy of the events; the source collection is never
/// mutated. Events are kept sorted by `(timestamp, id)` so a window is a
/// contiguous slice.
#[derive(Debug, Default, Clone)]
pub struct AnalyticsService {
    by_id: HashMap<String, CopilotUsageEvent>,
    timeline: Vec<CopilotUsageEvent>,
}

impl AnalyticsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `events`.
    ///
    /// With `replace` the whole index is swapped; otherwise events are
    /// merged by id, later ones winning.
    pub fn ingest(&mut self, events: &[CopilotUsageEvent], replace: bool) {
        let mut by_id = if replace {
            HashMap::with_capacity(events.len())
        } else {
            std::mem::take(&mut self.by_id)
        };
        for event in events {
            by_id.insert(event.id.clone(), event.clone());
        }
        self.reindex(by_id);
        tracing::debug!(events = self.timeline.len(), replace, "Analytics index updated");
    }

    /// Drop events by id.
    pub fn remove(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut by_id = std::mem::take(&mut self.by_id);
        for id in ids {
            by_id.remove(id);
        }
        self.reindex(by_id);
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.timeline.clear();
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    /// Indexed events, oldest first.
    pub fn events(&self) -> &[CopilotUsageEvent] {
        &self.timeline
    }

    pub fn get_kpis(&self, filter: &Filter) -> Kpis {
        let (_, events) = self.in_window(filter);

        let mut sessions = HashSet::new();
        let mut requests = HashSet::new();
        let mut files = HashSet::new();
        let mut models = HashSet::new();
        let mut agents = HashSet::new();
        let mut durations = Vec::new();
        let mut edits = 0usize;
        let mut file_modifications = 0u64;

        for event in events {
            sessions.insert(event.session_id.as_str());
            if let Some(request) = event.normalized_request_id() {
                requests.insert(request);
            }
            if let Some(path) = event.file_path.as_deref() {
                files.insert(path);
            }
            if let Some(model) = event.model.as_deref() {
                models.insert(model);
            }
            if let Some(agent) = event.agent.as_deref() {
                agents.insert(agent);
            }
            if let Some(duration) = event.duration_ms {
                durations.push(duration);
            }
            if event.is_in_edit {
                edits += 1;
                file_modifications += u64::from(event.files_modified);
            }
        }

        Kpis {
            sessions: sessions.len(),
            turns: events.len(),
            requests: requests.len(),
            files: files.len(),
            edits,
            edit_ratio: ratio(edits as f64, events.len() as f64),
            file_modifications,
            edit_productivity: ratio(file_modifications as f64, edits as f64),
            latency_ms_median: median(&mut durations),
            models: models.len(),
            agents: agents.len(),
        }
    }

    /// One point per UTC day in the window, including empty days.
    pub fn get_time_series(&self, filter: &Filter) -> Vec<TimeSeriesPoint> {
        let (window, events) = self.in_window(filter);
        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for event in events {
            *per_day.entry(event.timestamp.date_naive()).or_default() += 1;
        }
        window
            .days()
            .map(|t| TimeSeriesPoint {
                t,
                total: per_day.get(&t).copied().unwrap_or(0),
            })
            .collect()
    }

    pub fn get_agents(&self, filter: &Filter, limit: usize) -> Vec<AgentStat> {
        let (_, events) = self.in_window(filter);
        let total = events.len() as f64;
        top_groups(events, |e| e.agent.as_deref(), limit)
            .into_iter()
            .map(|(agent, group)| AgentStat {
                agent: agent.to_string(),
                count: group.len(),
                share: ratio(group.len() as f64, total),
                median_latency_ms: median_latency(&group),
            })
            .collect()
    }

    pub fn get_models(&self, filter: &Filter, limit: usize) -> Vec<ModelStat> {
        let (_, events) = self.in_window(filter);
        let total = events.len() as f64;
        top_groups(events, |e| e.model.as_deref(), limit)
            .into_iter()
            .map(|(model, group)| ModelStat {
                model: model.to_string(),
                count: group.len(),
                share: ratio(group.len() as f64, total),
                tokens: group.iter().filter_map(|e| e.tokens_used).sum(),
                median_latency_ms: median_latency(&group),
            })
            .collect()
    }

    pub fn get_languages(&self, filter: &Filter, limit: usize) -> Vec<LangStat> {
        let (_, events) = self.in_window(filter);
        top_groups(events, |e| e.language.as_deref(), limit)
            .into_iter()
            .map(|(language, group)| LangStat {
                language: language.to_string(),
                count: group.len(),
                files: group
                    .iter()
                    .filter_map(|e| e.file_path.as_deref())
                    .collect::<HashSet<_>>()
                    .len(),
            })
            .collect()
    }

    /// Most recent events in the window, newest first.
    pub fn get_activity(&self, filter: &Filter, limit: usize) -> Vec<ActivityItem> {
        let (_, events) = self.in_window(filter);
        events
            .iter()
            .rev()
            .take(limit)
            .map(|e| ActivityItem {
                id: e.id.clone(),
                timestamp: e.timestamp,
                event_type: e.event_type,
                agent: e.agent.clone(),
                model: e.model.clone(),
                language: e.language.clone(),
                file_path: e.file_path.clone(),
                prompt_preview: e
                    .user_prompt
                    .as_deref()
                    .map(|p| preview(p, PROMPT_PREVIEW_CHARS)),
                is_in_edit: e.is_in_edit,
            })
            .collect()
    }

    fn reindex(&mut self, by_id: HashMap<String, CopilotUsageEvent>) {
        let mut timeline: Vec<CopilotUsageEvent> = by_id.values().cloned().collect();
        timeline.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        self.by_id = by_id;
        self.timeline = timeline;
    }

    fn in_window(&self, filter: &Filter) -> (Window, &[CopilotUsageEvent]) {
        let earliest = self.timeline.first().map(|e| e.timestamp);
        let window = filter.window(earliest);
        let lo = self.timeline.partition_point(|e| e.timestamp < window.start);
        let hi = self.timeline.partition_point(|e| e.timestamp < window.end);
        (window, &self.timeline[lo..hi.max(lo)])
    }
}

/// Group by a key, largest groups first, ties by key. Events without the
/// key are skipped.
fn top_groups<'a, F>(
    events: &'a [CopilotUsageEvent],
    key: F,
    limit: usize,
) -> Vec<(&'a str, Vec<&'a CopilotUsageEvent>)>
where
    F: Fn(&'a CopilotUsageEvent) -> Option<&'a str>,
{
    let mut groups: HashMap<&str, Vec<&CopilotUsageEvent>> = HashMap::new();
    for event in events {
        if let Some(k) = key(event) {
            groups.entry(k).or_default().push(event);
        }
    }
    let mut groups: Vec<(&str, Vec<&CopilotUsageEvent>)> = groups.into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
    groups.truncate(limit);
    groups
}

fn median_latency(group: &[&CopilotUsageEvent]) -> Option<u64> {
    let mut durations: Vec<u64> = group.iter().filter_map(|e| e.duration_ms).collect();
    median(&mut durations)
}
