//! Query result shapes and the numeric helpers behind them.

use crate::types::EventType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Headline numbers for a window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    /// Distinct session ids
    pub sessions: usize,
    /// Events in the window
    pub turns: usize,
    /// Distinct request ids
    pub requests: usize,
    /// Distinct file paths referenced
    pub files: usize,
    /// Events correlated with an edit
    pub edits: usize,
    /// `edits / turns`, 0 when there are no turns
    pub edit_ratio: f64,
    /// Files modified summed over edit-correlated events
    pub file_modifications: u64,
    /// `file_modifications / edits`, 0 when there are no edits
    pub edit_productivity: f64,
    /// Median duration over events that carry one
    pub latency_ms_median: Option<u64>,
    pub models: usize,
    pub agents: usize,
}

impl Kpis {
    pub fn edit_ratio_percent(&self) -> f64 {
        percent(self.edit_ratio)
    }
}

/// One day of the dense time series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeriesPoint {
    /// UTC day
    pub t: NaiveDate,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStat {
    pub agent: String,
    pub count: usize,
    /// Fraction of in-window events (0..=1)
    pub share: f64,
    pub median_latency_ms: Option<u64>,
}

impl AgentStat {
    pub fn percent(&self) -> f64 {
        percent(self.share)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStat {
    pub model: String,
    pub count: usize,
    /// Fraction of in-window events (0..=1)
    pub share: f64,
    /// Tokens summed over events that report usage
    pub tokens: u64,
    pub median_latency_ms: Option<u64>,
}

impl ModelStat {
    pub fn percent(&self) -> f64 {
        percent(self.share)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LangStat {
    pub language: String,
    pub count: usize,
    /// Distinct files in this language
    pub files: usize,
}

/// One row of the activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub prompt_preview: Option<String>,
    pub is_in_edit: bool,
}

/// Middle element of the sorted sample; mean of the two middles for even
/// lengths (rounded down). `None` for an empty sample.
pub fn median(values: &mut [u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let (a, b) = (values[mid - 1], values[mid]);
        Some(a / 2 + b / 2 + (a % 2 + b % 2) / 2)
    }
}

/// `numerator / denominator`, 0 when the denominator is 0.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// A 0..=1 fraction as a percentage with one decimal place.
pub fn percent(fraction: f64) -> f64 {
    (fraction * 1000.0).round() / 10.0
}

/// First `max` characters of `text` on one line, with an ellipsis if cut.
pub fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
