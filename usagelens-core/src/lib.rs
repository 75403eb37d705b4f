//! # usagelens-core
//!
//! Core library for usagelens - Copilot usage analytics built from the
//! artifacts an IDE leaves on disk.
//!
//! This library provides:
//! - Scanners for chat sessions, edit-state timelines and request logs
//! - File watching with per-file debounce and bounded retries
//! - A unified service that merges the three sources into one deduplicated
//!   event collection
//! - Windowed analytics (KPIs, time series, top-N, activity feed)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Raw:** source files on disk, never written
//! - **Events:** [`CopilotUsageEvent`]s keyed by a stable id, owned by
//!   [`UnifiedSessionDataService`]
//! - **Derived:** [`AnalyticsService`] indexes, regenerable at any time
//!
//! ## Example
//!
//! ```rust,no_run
//! use usagelens_core::analytics::{Filter, TimeRange};
//! use usagelens_core::{AnalyticsService, Config, UnifiedSessionDataService};
//!
//! let config = Config::load().expect("failed to load config");
//! let service = UnifiedSessionDataService::new(&config);
//! service.initialize().expect("initial scan failed");
//!
//! let mut analytics = AnalyticsService::new();
//! analytics.ingest(&service.session_events().unwrap(), true);
//! let kpis = analytics.get_kpis(&Filter::new(TimeRange::Days7));
//! println!("{} turns", kpis.turns);
//! ```

// Re-export commonly used items at the crate root
pub use analytics::AnalyticsService;
pub use config::Config;
pub use error::{Error, Result};
pub use service::{SessionEventsUpdate, UnifiedScanStats, UnifiedSessionDataService, UpdateKind};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod service;
pub mod types;
pub mod watch;
