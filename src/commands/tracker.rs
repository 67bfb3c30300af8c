use crate::error::AppError;
use crate::market::pipeline::start_tracker as start_tracker_runtime;
use crate::market::types::{
    StartTrackerArgs, TrackerRunState, TrackerSession, TrackerStatusSnapshot, TrackerStopResult,
};
use crate::state::AppState;
use std::sync::Arc;

/// Replaces any running tracker. Fails only on invalid arguments or when the initial
/// catalog cannot be loaded from either the venue or the cache.
pub async fn start_tracker(
    state: &AppState,
    args: Option<StartTrackerArgs>,
    pins: Vec<String>,
) -> Result<TrackerSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut tracker_slot = state.tracker.lock().await;
        tracker_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.stop().await;
    }

    let handle = start_tracker_runtime(
        config.clone(),
        state.db_pool.clone(),
        Arc::clone(&state.tracker_status),
        pins,
    )
    .await?;

    {
        let mut tracker_slot = state.tracker.lock().await;
        *tracker_slot = Some(handle);
    }

    Ok(TrackerSession::from_config(&config))
}

pub async fn stop_tracker(state: &AppState) -> Result<TrackerStopResult, AppError> {
    let existing_handle = {
        let mut tracker_slot = state.tracker.lock().await;
        tracker_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.stop().await;
        true
    } else {
        false
    };

    {
        let mut writable = state.tracker_status.write().await;
        *writable = TrackerStatusSnapshot::stopped(Some("tracker stopped by command".to_string()));
    }

    Ok(TrackerStopResult { stopped })
}

/// Status snapshot with pin count and last tick time read from the live store.
pub async fn tracker_status(state: &AppState) -> Result<TrackerStatusSnapshot, AppError> {
    let mut snapshot = state.tracker_status.read().await.clone();

    let tracker_slot = state.tracker.lock().await;
    if let Some(handle) = tracker_slot.as_ref() {
        if handle.is_finished() && snapshot.state == TrackerRunState::Running {
            snapshot.state = TrackerRunState::Stopped;
        }
        handle.store.with_state(|tracker_state| {
            snapshot.pinned_count = tracker_state.pinned_groups.len();
            snapshot.last_tick_time = tracker_state.last_tick_time;
        });
    }

    Ok(snapshot)
}
