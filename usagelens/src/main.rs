//! usagelens - Copilot usage analytics from IDE artifacts
//!
//! Scans chat sessions, edit-state timelines and request logs left on disk by
//! the IDE, merges them into one event collection and reports on it.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/usagelens/ (~/.local/state/usagelens/)
//! - Config: $XDG_CONFIG_HOME/usagelens/config.toml (~/.config/usagelens/config.toml)

mod report;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use usagelens_core::analytics::{Filter, TimeRange};
use usagelens_core::{
    AnalyticsService, Config, SessionEventsUpdate, UnifiedSessionDataService, UpdateKind,
};

#[derive(Parser)]
#[command(name = "usagelens")]
#[command(about = "Copilot usage analytics from IDE session and log artifacts")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/usagelens/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace-storage root to scan (repeatable, replaces configured roots)
    #[arg(long = "storage-root", global = true)]
    storage_roots: Vec<PathBuf>,

    /// Log root to scan (repeatable, replaces configured roots)
    #[arg(long = "log-root", global = true)]
    log_roots: Vec<PathBuf>,

    /// Time range: today, 7d, 30d, 90d or all
    #[arg(short, long, global = true)]
    range: Option<TimeRange>,

    /// Maximum rows for lists
    #[arg(short, long, global = true)]
    limit: Option<usize>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan all sources and print counters
    Scan,
    /// Headline numbers for the range
    Kpis,
    /// Events per day
    Series,
    /// Most used agents, models or languages
    Top {
        #[arg(value_enum)]
        dimension: Dimension,
    },
    /// Most recent events
    Activity,
    /// Dump everything as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Follow the sources and report changes until interrupted
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dimension {
    Agents,
    Models,
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if !args.storage_roots.is_empty() {
        config.sources.storage_roots = args.storage_roots.clone();
    }
    if !args.log_roots.is_empty() {
        config.sources.log_roots = args.log_roots.clone();
    }
    config.watch.enabled = matches!(args.command, Command::Watch);

    let _log_guard =
        usagelens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("usagelens starting");

    let range = match args.range {
        Some(range) => range,
        None => config
            .analytics
            .time_range()
            .context("invalid analytics.default_range")?,
    };

    let service = UnifiedSessionDataService::new(&config);
    let result = match &args.command {
        Command::Watch => run_watch(&service, &args).await,
        command => run_once(&service, command, &args, &config, range),
    };

    service.dispose();
    tracing::info!("usagelens finished");
    result
}

/// Scan once, then answer one query.
fn run_once(
    service: &UnifiedSessionDataService,
    command: &Command,
    args: &Args,
    config: &Config,
    range: TimeRange,
) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning sources...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = service.scan_all_data().context("scan failed");
    spinner.finish_and_clear();
    let outcome = outcome?;

    let mut analytics = AnalyticsService::new();
    analytics.ingest(&outcome.session_events, true);

    match command {
        Command::Scan => {
            if args.json {
                report::print_json(&outcome.stats)?;
            } else {
                report::print_scan(&outcome.stats);
            }
        }
        Command::Kpis => {
            let kpis = analytics.get_kpis(&Filter::new(range));
            if args.json {
                report::print_json(&kpis)?;
            } else {
                report::print_kpis(range, &kpis);
            }
        }
        Command::Series => {
            let series = analytics.get_time_series(&Filter::new(range));
            if args.json {
                report::print_json(&series)?;
            } else {
                report::print_series(&series);
            }
        }
        Command::Top { dimension } => {
            let limit = args.limit.unwrap_or(config.analytics.top_n);
            let filter = Filter::new(range);
            match dimension {
                Dimension::Agents => {
                    let rows = analytics.get_agents(&filter, limit);
                    if args.json {
                        report::print_json(&rows)?;
                    } else {
                        report::print_agents(&rows);
                    }
                }
                Dimension::Models => {
                    let rows = analytics.get_models(&filter, limit);
                    if args.json {
                        report::print_json(&rows)?;
                    } else {
                        report::print_models(&rows);
                    }
                }
                Dimension::Languages => {
                    let rows = analytics.get_languages(&filter, limit);
                    if args.json {
                        report::print_json(&rows)?;
                    } else {
                        report::print_languages(&rows);
                    }
                }
            }
        }
        Command::Activity => {
            let limit = args.limit.unwrap_or(config.analytics.activity_limit);
            let items = analytics.get_activity(&Filter::new(range), limit);
            if args.json {
                report::print_json(&items)?;
            } else {
                report::print_activity(&items);
            }
        }
        Command::Export { output } => {
            let export = service.export_data().context("export failed")?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!(
                        "Exported {} events to {}",
                        export.events.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        Command::Watch => anyhow::bail!("watch runs continuously and has no one-shot form"),
    }

    tracing::info!(
        events = outcome.stats.total_events,
        duration_ms = outcome.stats.scan_duration_ms,
        "Query complete"
    );
    Ok(())
}

/// Initial scan, then print every change until Ctrl+C.
async fn run_watch(service: &UnifiedSessionDataService, args: &Args) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let analytics = Arc::new(RwLock::new(AnalyticsService::new()));
    service.bind_analytics(Arc::clone(&analytics));

    let json = args.json;
    service.on_session_events_updated(Arc::new(move |update: &SessionEventsUpdate| {
        if update.kind == UpdateKind::Incremental {
            report::print_update(update, json);
        }
    }));

    let outcome = service.scan_all_data().context("initial scan failed")?;
    let status = service.real_time_status();

    println!(
        "Watching {} events (sessions: {}, edit-state: {}, logs: {}). Press Ctrl+C to stop.",
        outcome.stats.total_events,
        report::on_off(status.sessions),
        report::on_off(status.edit_state),
        report::on_off(status.logs),
    );
    println!();

    if !status.any() {
        tracing::warn!("No watcher could start, nothing to follow");
    }

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    service.stop_real_time_updates();
    println!("Watch mode stopped.");
    tracing::info!("usagelens watch mode stopped");

    Ok(())
}
