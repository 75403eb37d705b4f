//! Text and JSON rendering for query results.

use anyhow::Result;
use serde::Serialize;
use usagelens_core::analytics::{
    ActivityItem, AgentStat, Kpis, LangStat, ModelStat, TimeRange, TimeSeriesPoint,
};
use usagelens_core::{SessionEventsUpdate, UnifiedScanStats};

/// Width of the longest bar in the series chart
const BAR_WIDTH: usize = 40;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "live"
    } else {
        "pull"
    }
}

pub fn print_scan(stats: &UnifiedScanStats) {
    println!("Scan complete:");
    for (label, source) in [
        ("Chat sessions", &stats.sessions),
        ("Edit state", &stats.edit_state),
        ("Request logs", &stats.logs),
    ] {
        println!(
            "  {:<14} {} file(s), {} record(s), {} error(s), {} dropped",
            label,
            source.total_files,
            source.total_turns,
            source.error_files,
            source.dropped_records
        );
    }
    println!("  Events:        {}", stats.total_events);
    println!("  In edit:       {}", stats.events_in_edit);
    println!("  Log only:      {}", stats.log_only_events);
    println!("  Duration:      {}ms", stats.scan_duration_ms);
    if !stats.degraded_sources.is_empty() {
        println!("\nUnavailable: {}", stats.degraded_sources.join(", "));
    }
}

pub fn print_kpis(range: TimeRange, kpis: &Kpis) {
    println!("Usage ({range}):");
    println!("  Sessions:          {}", kpis.sessions);
    println!("  Turns:             {}", kpis.turns);
    println!("  Requests:          {}", kpis.requests);
    println!("  Files referenced:  {}", kpis.files);
    println!(
        "  Edits:             {} ({:.1}%)",
        kpis.edits,
        kpis.edit_ratio_percent()
    );
    println!("  Files modified:    {}", kpis.file_modifications);
    println!("  Files per edit:    {:.2}", kpis.edit_productivity);
    match kpis.latency_ms_median {
        Some(ms) => println!("  Median latency:    {ms}ms"),
        None => println!("  Median latency:    -"),
    }
    println!("  Models:            {}", kpis.models);
    println!("  Agents:            {}", kpis.agents);
}

pub fn print_series(series: &[TimeSeriesPoint]) {
    let peak = series.iter().map(|p| p.total).max().unwrap_or(0);
    for point in series {
        let width = if peak == 0 {
            0
        } else {
            point.total * BAR_WIDTH / peak
        };
        println!("{}  {:>5}  {}", point.t, point.total, "#".repeat(width));
    }
}

pub fn print_agents(rows: &[AgentStat]) {
    if rows.is_empty() {
        println!("No agent activity in range.");
        return;
    }
    for row in rows {
        println!(
            "{:<40} {:>6} {:>6.1}%  {}",
            row.agent,
            row.count,
            row.percent(),
            latency(row.median_latency_ms)
        );
    }
}

pub fn print_models(rows: &[ModelStat]) {
    if rows.is_empty() {
        println!("No model activity in range.");
        return;
    }
    for row in rows {
        println!(
            "{:<30} {:>6} {:>6.1}%  {:>10} tok  {}",
            row.model,
            row.count,
            row.percent(),
            row.tokens,
            latency(row.median_latency_ms)
        );
    }
}

pub fn print_languages(rows: &[LangStat]) {
    if rows.is_empty() {
        println!("No language activity in range.");
        return;
    }
    for row in rows {
        println!(
            "{:<20} {:>6} event(s) {:>5} file(s)",
            row.language, row.count, row.files
        );
    }
}

pub fn print_activity(items: &[ActivityItem]) {
    if items.is_empty() {
        println!("No activity in range.");
        return;
    }
    for item in items {
        let marker = if item.is_in_edit { "*" } else { " " };
        println!(
            "{} {}{:<8} {:<14} {}",
            item.timestamp.format("%Y-%m-%d %H:%M"),
            marker,
            format!("{:?}", item.event_type).to_lowercase(),
            item.model.as_deref().unwrap_or("-"),
            item.prompt_preview.as_deref().unwrap_or("")
        );
    }
}

/// One line per incremental update in watch mode.
pub fn print_update(update: &SessionEventsUpdate, json: bool) {
    if json {
        match serde_json::to_string(&update.events) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to render update"),
        }
        return;
    }
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    println!(
        "[{}] {} event(s) changed, {} removed",
        timestamp,
        update.events.len(),
        update.removed.len()
    );
    for event in &update.events {
        println!(
            "  {} {:?} {}",
            event.timestamp.format("%H:%M:%S"),
            event.event_type,
            event.model.as_deref().unwrap_or("-")
        );
    }
}

fn latency(ms: Option<u64>) -> String {
    ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string())
}
