use crate::error::AppError;
use crate::market::now_unix_ms;
use crate::market::store::{StoreAction, StoreHandle};
use crate::market::types::{PinnedGroup, TimeRange};
use crate::state::AppState;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub event_id: String,
    pub title: String,
    pub market_count: usize,
    pub lead_price: f64,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub market_id: String,
    pub label: String,
    pub current_price: f64,
    pub points: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedSummary {
    pub event_id: String,
    pub title: String,
    pub time_range: TimeRange,
    pub current_price: f64,
    pub session_open_price: f64,
    pub points: usize,
    pub outcomes: Vec<OutcomeSummary>,
}

impl From<&PinnedGroup> for PinnedSummary {
    fn from(pinned: &PinnedGroup) -> Self {
        Self {
            event_id: pinned.event_id().to_string(),
            title: pinned.group.title.clone(),
            time_range: pinned.time_range,
            current_price: pinned.current_price,
            session_open_price: pinned.session_open_price,
            points: pinned.time_series.len(),
            outcomes: pinned
                .outcome_series
                .iter()
                .map(|series| OutcomeSummary {
                    market_id: series.market_id.clone(),
                    label: series.label.clone(),
                    current_price: series.current_price,
                    points: series.ticks.len(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PinResult {
    /// False when the group is already pinned or capacity is reached.
    pub accepted: bool,
}

async fn running_store(state: &AppState) -> Result<StoreHandle, AppError> {
    let tracker_slot = state.tracker.lock().await;
    tracker_slot
        .as_ref()
        .map(|handle| handle.store.clone())
        .ok_or(AppError::TrackerNotRunning)
}

fn ensure_pinned(store: &StoreHandle, event_id: &str) -> Result<(), AppError> {
    if store.with_state(|tracker_state| tracker_state.pinned(event_id).is_some()) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("group '{event_id}' is not pinned")))
    }
}

pub async fn list_catalog(state: &AppState) -> Result<Vec<CatalogEntry>, AppError> {
    let store = running_store(state).await?;
    Ok(store.with_state(|tracker_state| {
        tracker_state
            .all_groups
            .iter()
            .map(|group| CatalogEntry {
                event_id: group.event_id.clone(),
                title: group.title.clone(),
                market_count: group.markets.len(),
                lead_price: group.lead_market().map(|m| m.lead_price()).unwrap_or(0.0),
                pinned: tracker_state.pinned(&group.event_id).is_some(),
            })
            .collect()
    }))
}

pub async fn pin_group(
    state: &AppState,
    event_id: &str,
    time_range: Option<TimeRange>,
) -> Result<PinResult, AppError> {
    let (store, default_time_range) = {
        let tracker_slot = state.tracker.lock().await;
        let handle = tracker_slot.as_ref().ok_or(AppError::TrackerNotRunning)?;
        (handle.store.clone(), handle.config.default_time_range)
    };

    let group = store
        .with_state(|tracker_state| tracker_state.catalog_group(event_id).cloned())
        .ok_or_else(|| AppError::NotFound(format!("group '{event_id}' is not in the catalog")))?;

    let accepted = store
        .apply(StoreAction::Pin {
            group,
            time_range: time_range.unwrap_or(default_time_range),
            now_ms: now_unix_ms(),
        })
        .await?;
    if !accepted {
        debug!(event_id, "pin ignored: already pinned or no free slot");
    }
    Ok(PinResult { accepted })
}

pub async fn unpin_group(state: &AppState, event_id: &str) -> Result<(), AppError> {
    let store = running_store(state).await?;
    ensure_pinned(&store, event_id)?;
    store
        .apply(StoreAction::Unpin {
            event_id: event_id.to_string(),
        })
        .await?;
    Ok(())
}

pub async fn set_time_range(
    state: &AppState,
    event_id: &str,
    time_range: TimeRange,
) -> Result<(), AppError> {
    let store = running_store(state).await?;
    ensure_pinned(&store, event_id)?;
    store
        .apply(StoreAction::SetTimeRange {
            event_id: event_id.to_string(),
            time_range,
            now_ms: now_unix_ms(),
        })
        .await?;
    Ok(())
}

pub async fn pinned_snapshot(state: &AppState) -> Result<Vec<PinnedSummary>, AppError> {
    let store = running_store(state).await?;
    Ok(store.with_state(|tracker_state| {
        tracker_state
            .pinned_groups
            .iter()
            .map(PinnedSummary::from)
            .collect()
    }))
}
