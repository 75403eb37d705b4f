//! Analytics over the merged event collection
//!
//! [`AnalyticsService`] keeps its own sorted copy of the events and answers
//! windowed queries:
//!
//! | Query | Result |
//! |-------|--------|
//! | `get_kpis` | [`Kpis`] |
//! | `get_time_series` | one [`TimeSeriesPoint`] per day, dense |
//! | `get_agents` / `get_models` / `get_languages` | top-N by count, ties by name |
//! | `get_activity` | newest events first |
//!
//! Every query takes a [`Filter`]; windows are whole UTC days ending today.
//! List queries also take an explicit length. [`ComponentModel`] wraps one
//! query with a filter, a list length and its last result.

mod component;
mod filter;
mod service;
mod stats;

pub use component::{
    activity_model, agents_model, kpis_model, languages_model, models_model, time_series_model,
    ComponentModel, Loader, DEFAULT_LIST_LIMIT,
};
pub use filter::{Filter, TimeRange, Window, MAX_ALL_DAYS};
pub use service::AnalyticsService;
pub use stats::{
    median, percent, ratio, ActivityItem, AgentStat, Kpis, LangStat, ModelStat, TimeSeriesPoint,
};
