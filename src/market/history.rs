//! Historical backfills.
//!
//! The [`RequestLedger`] maps every backfill key derivable from the pinned set to its fetch
//! state. Keys are marked in flight before the request starts and pruned as soon as the pinned
//! set no longer derives them, so returning to a group or range later fetches again.

use crate::error::AppError;
use crate::market::polymarket::fetch_price_history;
use crate::market::store::{StoreAction, StoreHandle};
use crate::market::types::{PinnedGroup, PriceTick, TimeRange};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const LIVE_WINDOW_MS: i64 = 10 * 60 * 1_000;
pub const LIVE_FALLBACK_POINTS: usize = 5;
pub const MAX_CONCURRENT_FETCHES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryKey {
    pub event_id: String,
    pub time_range: TimeRange,
    /// Set for one outcome of a multi-outcome group.
    pub market_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub key: HistoryKey,
    pub instrument_id: String,
}

impl HistoryRequest {
    pub fn into_action(self, ticks: Vec<PriceTick>) -> StoreAction {
        let HistoryKey {
            event_id,
            time_range,
            market_id,
        } = self.key;
        match market_id {
            Some(market_id) => StoreAction::ApplyOutcomeHistory {
                event_id,
                market_id,
                time_range,
                ticks,
            },
            None => StoreAction::ApplyHistory {
                event_id,
                time_range,
                ticks,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    InFlight,
    Completed,
    Failed,
}

pub fn derive_requests(pinned_groups: &[PinnedGroup]) -> Vec<HistoryRequest> {
    let mut requests = Vec::new();
    for pinned in pinned_groups {
        if pinned.is_binary() {
            if let Some(instrument_id) = pinned.lead_instrument() {
                requests.push(HistoryRequest {
                    key: HistoryKey {
                        event_id: pinned.event_id().to_string(),
                        time_range: pinned.time_range,
                        market_id: None,
                    },
                    instrument_id: instrument_id.to_string(),
                });
            }
            continue;
        }

        for outcome in &pinned.outcome_series {
            if outcome.instrument_id.is_empty() {
                continue;
            }
            requests.push(HistoryRequest {
                key: HistoryKey {
                    event_id: pinned.event_id().to_string(),
                    time_range: pinned.time_range,
                    market_id: Some(outcome.market_id.clone()),
                },
                instrument_id: outcome.instrument_id.clone(),
            });
        }
    }
    requests
}

#[derive(Debug, Default)]
pub struct RequestLedger {
    entries: HashMap<HistoryKey, FetchState>,
}

impl RequestLedger {
    pub fn state(&self, key: &HistoryKey) -> Option<FetchState> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prunes keys the pinned set no longer derives and returns the requests to start.
    /// Returned keys are already marked in flight.
    pub fn plan(&mut self, pinned_groups: &[PinnedGroup]) -> Vec<HistoryRequest> {
        let required = derive_requests(pinned_groups);
        let before = self.entries.len();
        self.entries
            .retain(|key, _| required.iter().any(|request| &request.key == key));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned, "pruned stale history keys");
        }

        required
            .into_iter()
            .filter(|request| {
                if self.entries.contains_key(&request.key) {
                    return false;
                }
                self.entries.insert(request.key.clone(), FetchState::InFlight);
                true
            })
            .collect()
    }

    pub fn complete(&mut self, key: &HistoryKey) {
        if let Some(state) = self.entries.get_mut(key) {
            *state = FetchState::Completed;
        }
    }

    pub fn fail(&mut self, key: &HistoryKey) {
        if let Some(state) = self.entries.get_mut(key) {
            *state = FetchState::Failed;
        }
    }
}

/// Keeps the last ten minutes, or the last few raw points if that window is too sparse.
pub fn trim_live_window(ticks: Vec<PriceTick>, now_ms: i64) -> Vec<PriceTick> {
    let cutoff = now_ms - LIVE_WINDOW_MS;
    let recent: Vec<PriceTick> = ticks
        .iter()
        .copied()
        .filter(|tick| tick.timestamp >= cutoff)
        .collect();
    if recent.len() >= 2 {
        return recent;
    }
    let skip = ticks.len().saturating_sub(LIVE_FALLBACK_POINTS);
    ticks.into_iter().skip(skip).collect()
}

#[derive(Clone)]
pub struct HistoryFetcher {
    client: Client,
    clob_url: String,
    timeout: Duration,
    limiter: Arc<Semaphore>,
    ledger: Arc<Mutex<RequestLedger>>,
    store: StoreHandle,
    cancel_token: CancellationToken,
}

impl HistoryFetcher {
    pub fn new(
        client: Client,
        clob_url: String,
        timeout: Duration,
        store: StoreHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            clob_url,
            timeout,
            limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES)),
            ledger: Arc::new(Mutex::new(RequestLedger::default())),
            store,
            cancel_token,
        }
    }

    pub fn ledger(&self) -> Arc<Mutex<RequestLedger>> {
        Arc::clone(&self.ledger)
    }

    /// Reconciles the ledger with the pinned set and spawns one task per new key.
    pub fn on_pinned_changed(&self, pinned_groups: &[PinnedGroup]) -> usize {
        let requests = self.ledger.lock().plan(pinned_groups);
        let started = requests.len();
        for request in requests {
            let fetcher = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = fetcher.cancel_token.cancelled() => {}
                    _ = fetcher.run_request(request) => {}
                }
            });
        }
        started
    }

    async fn run_request(&self, request: HistoryRequest) {
        let Ok(_permit) = self.limiter.acquire().await else {
            return;
        };

        let key = request.key.clone();
        match self.fetch(&request).await {
            Ok(ticks) if !ticks.is_empty() => {
                debug!(
                    event_id = %key.event_id,
                    market_id = ?key.market_id,
                    range = key.time_range.as_str(),
                    points = ticks.len(),
                    "history fetched"
                );
                if let Err(error) = self.store.dispatch(request.into_action(ticks)) {
                    debug!(%error, "store closed before backfill applied");
                    return;
                }
                self.ledger.lock().complete(&key);
            }
            Ok(_) => {
                debug!(event_id = %key.event_id, range = key.time_range.as_str(), "empty history");
                self.ledger.lock().fail(&key);
            }
            Err(error) => {
                warn!(
                    event_id = %key.event_id,
                    instrument_id = %request.instrument_id,
                    range = key.time_range.as_str(),
                    %error,
                    "history fetch failed"
                );
                self.ledger.lock().fail(&key);
            }
        }
    }

    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<PriceTick>, AppError> {
        let time_range = request.key.time_range;
        let ticks = tokio::time::timeout(
            self.timeout,
            fetch_price_history(&self.client, &self.clob_url, &request.instrument_id, time_range),
        )
        .await
        .map_err(|_| AppError::Timeout(self.timeout.as_millis() as u64))??;

        if time_range == TimeRange::Live {
            return Ok(trim_live_window(ticks, crate::market::now_unix_ms()));
        }
        Ok(ticks)
    }
}
