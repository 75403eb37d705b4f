//! Per-view state holders.
//!
//! A view (KPI cards, a chart, a top-N table, the activity feed) is a
//! [`ComponentModel`]: a filter and list length, a loader that turns the
//! analytics index into the view's state, and the last state produced.

use super::filter::Filter;
use super::service::AnalyticsService;
use super::stats::{ActivityItem, AgentStat, Kpis, LangStat, ModelStat, TimeSeriesPoint};
use chrono::{DateTime, Utc};

/// Turns the index into a view's state. The `usize` is the list length,
/// ignored by views that are not lists.
pub type Loader<T> = fn(&AnalyticsService, &Filter, usize) -> T;

/// List length until [`ComponentModel::set_limit`] says otherwise
pub const DEFAULT_LIST_LIMIT: usize = 10;

pub struct ComponentModel<T> {
    name: &'static str,
    filter: Filter,
    limit: usize,
    loader: Loader<T>,
    state: Option<T>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<T> ComponentModel<T> {
    pub fn new(name: &'static str, filter: Filter, loader: Loader<T>) -> Self {
        Self {
            name,
            filter,
            limit: DEFAULT_LIST_LIMIT,
            loader,
            state: None,
            refreshed_at: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Change the filter. The old state is dropped until the next refresh.
    pub fn set_filter(&mut self, filter: Filter) {
        if filter != self.filter {
            self.filter = filter;
            self.invalidate();
        }
    }

    /// Change the list length. The old state is dropped until the next
    /// refresh.
    pub fn set_limit(&mut self, limit: usize) {
        if limit != self.limit {
            self.limit = limit;
            self.invalidate();
        }
    }

    /// Recompute the state from `analytics`.
    pub fn refresh(&mut self, analytics: &AnalyticsService) -> &T {
        let state = (self.loader)(analytics, &self.filter, self.limit);
        self.refreshed_at = Some(Utc::now());
        tracing::trace!(component = self.name, "Component refreshed");
        self.state.insert(state)
    }

    /// Last computed state, `None` before the first refresh.
    pub fn state(&self) -> Option<&T> {
        self.state.as_ref()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    fn invalidate(&mut self) {
        self.state = None;
        self.refreshed_at = None;
    }
}

pub fn kpis_model(filter: Filter) -> ComponentModel<Kpis> {
    ComponentModel::new("kpis", filter, |a, f, _| a.get_kpis(f))
}

pub fn time_series_model(filter: Filter) -> ComponentModel<Vec<TimeSeriesPoint>> {
    ComponentModel::new("time-series", filter, |a, f, _| a.get_time_series(f))
}

pub fn agents_model(filter: Filter) -> ComponentModel<Vec<AgentStat>> {
    ComponentModel::new("agents", filter, |a, f, n| a.get_agents(f, n))
}

pub fn models_model(filter: Filter) -> ComponentModel<Vec<ModelStat>> {
    ComponentModel::new("models", filter, |a, f, n| a.get_models(f, n))
}

pub fn languages_model(filter: Filter) -> ComponentModel<Vec<LangStat>> {
    ComponentModel::new("languages", filter, |a, f, n| a.get_languages(f, n))
}

pub fn activity_model(filter: Filter) -> ComponentModel<Vec<ActivityItem>> {
    ComponentModel::new("activity", filter, |a, f, n| a.get_activity(f, n))
}
