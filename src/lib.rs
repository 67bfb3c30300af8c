pub mod commands;
pub mod db;
pub mod error;
pub mod market;
pub mod state;

use commands::{
    health::health,
    pins::pinned_snapshot,
    tracker::{start_tracker, stop_tracker, tracker_status},
};
use db::initialize_pool;
use error::AppError;
use market::types::StartTrackerArgs;
use state::AppState;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub data_dir: PathBuf,
    pub tracker: StartTrackerArgs,
    pub pins: Vec<String>,
    pub report_interval: Duration,
}

async fn log_report(state: &AppState) -> Result<(), AppError> {
    let status = tracker_status(state).await?;
    info!(
        state = ?status.state,
        connection = ?status.connection,
        catalog = ?status.catalog_source,
        pinned = status.pinned_count,
        last_tick_time = status.last_tick_time,
        "tracker report"
    );

    for pinned in pinned_snapshot(state).await? {
        if pinned.outcomes.is_empty() {
            info!(
                event_id = %pinned.event_id,
                range = pinned.time_range.as_str(),
                price = pinned.current_price,
                open = pinned.session_open_price,
                points = pinned.points,
                "{}",
                pinned.title
            );
            continue;
        }
        for outcome in &pinned.outcomes {
            info!(
                event_id = %pinned.event_id,
                range = pinned.time_range.as_str(),
                outcome = %outcome.label,
                price = outcome.current_price,
                points = outcome.points,
                "{}",
                pinned.title
            );
        }
    }
    Ok(())
}

/// Runs the tracker until ctrl-c, logging a report every `report_interval`.
pub async fn run(options: RunOptions) -> Result<(), AppError> {
    let db_pool = initialize_pool(&options.data_dir).await?;
    let state = AppState::new(db_pool);

    let session = start_tracker(&state, Some(options.tracker), options.pins).await?;
    info!(
        stream_url = %session.stream_url,
        keywords = ?session.keywords,
        auto_pin = session.auto_pin_count,
        range = session.default_time_range.as_str(),
        "tracker started"
    );

    let mut report = tokio::time::interval_at(
        Instant::now() + options.report_interval,
        options.report_interval,
    );
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(error) = signal {
                    warn!(%error, "failed to listen for ctrl-c");
                }
                break;
            }
            _ = report.tick() => {
                if let Err(error) = log_report(&state).await {
                    warn!(%error, "failed to build tracker report");
                }
            }
        }
    }

    let stopped = stop_tracker(&state).await?;
    let health = health(&state).await?;
    info!(
        stopped = stopped.stopped,
        uptime_ms = health.uptime_ms as u64,
        db = health.db,
        "shutdown complete"
    );
    Ok(())
}
