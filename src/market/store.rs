//! Authoritative merge point for live ticks, history backfills and catalog polls.
//!
//! [`reduce`] is the pure `(state, action) -> state` transition. [`StoreHandle`] runs it on a
//! single task that owns the state, so transitions are applied strictly one at a time and each
//! result is published through a `watch` channel before the next action is read.

use crate::error::AppError;
use crate::market::types::{
    ConnectionStatus, MarketGroup, OutcomeSeries, PinnedGroup, PriceTick, TimeRange,
    MAX_OUTCOMES, MAX_PINNED_GROUPS, MAX_TICKS,
};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerState {
    pub all_groups: Vec<MarketGroup>,
    pub pinned_groups: Vec<PinnedGroup>,
    pub last_tick_time: Option<i64>,
    pub connection: ConnectionStatus,
    /// Incremented on every transition that changes the state.
    pub revision: u64,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            all_groups: Vec::new(),
            pinned_groups: Vec::new(),
            last_tick_time: None,
            connection: ConnectionStatus::Disconnected,
            revision: 0,
        }
    }
}

impl TrackerState {
    pub fn pinned(&self, event_id: &str) -> Option<&PinnedGroup> {
        self.pinned_groups
            .iter()
            .find(|pinned| pinned.event_id() == event_id)
    }

    pub fn catalog_group(&self, event_id: &str) -> Option<&MarketGroup> {
        self.all_groups
            .iter()
            .find(|group| group.event_id == event_id)
    }

    fn pinned_mut(&mut self, event_id: &str) -> Option<&mut PinnedGroup> {
        self.pinned_groups
            .iter_mut()
            .find(|pinned| pinned.event_id() == event_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    SetCatalog {
        groups: Vec<MarketGroup>,
    },
    SyncCatalog {
        groups: Vec<MarketGroup>,
        now_ms: i64,
    },
    Pin {
        group: MarketGroup,
        time_range: TimeRange,
        now_ms: i64,
    },
    Unpin {
        event_id: String,
    },
    ApplyHistory {
        event_id: String,
        time_range: TimeRange,
        ticks: Vec<PriceTick>,
    },
    ApplyOutcomeHistory {
        event_id: String,
        market_id: String,
        time_range: TimeRange,
        ticks: Vec<PriceTick>,
    },
    PriceTick {
        instrument_id: String,
        tick: PriceTick,
    },
    SetTimeRange {
        event_id: String,
        time_range: TimeRange,
        now_ms: i64,
    },
    SetConnectionStatus(ConnectionStatus),
}

impl StoreAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetCatalog { .. } => "set_catalog",
            Self::SyncCatalog { .. } => "sync_catalog",
            Self::Pin { .. } => "pin",
            Self::Unpin { .. } => "unpin",
            Self::ApplyHistory { .. } => "apply_history",
            Self::ApplyOutcomeHistory { .. } => "apply_outcome_history",
            Self::PriceTick { .. } => "price_tick",
            Self::SetTimeRange { .. } => "set_time_range",
            Self::SetConnectionStatus(_) => "set_connection_status",
        }
    }
}

pub fn reduce(mut state: TrackerState, action: StoreAction) -> TrackerState {
    apply_action(&mut state, action);
    state
}

/// Applies one action in place and reports whether anything changed.
pub fn apply_action(state: &mut TrackerState, action: StoreAction) -> bool {
    let changed = match action {
        StoreAction::SetCatalog { groups } => {
            state.all_groups = groups;
            true
        }
        StoreAction::SyncCatalog { groups, now_ms } => sync_catalog(state, groups, now_ms),
        StoreAction::Pin {
            group,
            time_range,
            now_ms,
        } => pin_group(state, group, time_range, now_ms),
        StoreAction::Unpin { event_id } => {
            let before = state.pinned_groups.len();
            state
                .pinned_groups
                .retain(|pinned| pinned.event_id() != event_id);
            state.pinned_groups.len() != before
        }
        StoreAction::ApplyHistory {
            event_id,
            time_range,
            ticks,
        } => apply_history(state, &event_id, time_range, ticks),
        StoreAction::ApplyOutcomeHistory {
            event_id,
            market_id,
            time_range,
            ticks,
        } => apply_outcome_history(state, &event_id, &market_id, time_range, ticks),
        StoreAction::PriceTick {
            instrument_id,
            tick,
        } => apply_price_tick(state, &instrument_id, tick),
        StoreAction::SetTimeRange {
            event_id,
            time_range,
            now_ms,
        } => set_time_range(state, &event_id, time_range, now_ms),
        StoreAction::SetConnectionStatus(status) => {
            let changed = state.connection != status;
            state.connection = status;
            changed
        }
    };

    if changed {
        state.revision = state.revision.wrapping_add(1);
    }
    changed
}

/// Appends a tick if it advances the series, evicting the oldest points beyond the cap.
pub fn push_tick(series: &mut VecDeque<PriceTick>, tick: PriceTick) -> bool {
    if let Some(last) = series.back() {
        if tick.timestamp <= last.timestamp {
            return false;
        }
    }
    series.push_back(tick);
    while series.len() > MAX_TICKS {
        series.pop_front();
    }
    true
}

/// Sorts a backfill, drops non-advancing or out-of-range points, keeps the newest `MAX_TICKS`.
pub fn normalize_backfill(mut ticks: Vec<PriceTick>) -> VecDeque<PriceTick> {
    ticks.retain(|tick| tick.price.is_finite() && (0.0..=1.0).contains(&tick.price));
    ticks.sort_by_key(|tick| tick.timestamp);

    let mut series = VecDeque::with_capacity(ticks.len().min(MAX_TICKS));
    for tick in ticks {
        push_tick(&mut series, tick);
    }
    series
}

fn seed_series(price: f64, now_ms: i64) -> VecDeque<PriceTick> {
    VecDeque::from([PriceTick::new(price, now_ms)])
}

fn build_outcome_series(group: &MarketGroup, now_ms: i64) -> Vec<OutcomeSeries> {
    let mut ranked: Vec<_> = group.markets.iter().collect();
    ranked.sort_by(|lhs, rhs| rhs.lead_price().total_cmp(&lhs.lead_price()));

    ranked
        .into_iter()
        .take(MAX_OUTCOMES)
        .map(|market| {
            let price = market.lead_price();
            OutcomeSeries {
                market_id: market.id.clone(),
                label: market.display_label().to_string(),
                instrument_id: market.lead_instrument().unwrap_or_default().to_string(),
                ticks: seed_series(price, now_ms),
                current_price: price,
            }
        })
        .collect()
}

fn pin_group(
    state: &mut TrackerState,
    group: MarketGroup,
    time_range: TimeRange,
    now_ms: i64,
) -> bool {
    if state.pinned_groups.len() >= MAX_PINNED_GROUPS {
        debug!(event_id = %group.event_id, "pin rejected: capacity reached");
        return false;
    }
    if state.pinned(&group.event_id).is_some() || group.markets.is_empty() {
        return false;
    }

    let price = group.lead_market().map(|market| market.lead_price()).unwrap_or(0.0);
    let outcome_series = if group.is_binary() {
        Vec::new()
    } else {
        build_outcome_series(&group, now_ms)
    };

    state.pinned_groups.push(PinnedGroup {
        group,
        time_range,
        time_series: seed_series(price, now_ms),
        session_open_price: price,
        current_price: price,
        outcome_series,
    });
    true
}

fn apply_history(
    state: &mut TrackerState,
    event_id: &str,
    time_range: TimeRange,
    ticks: Vec<PriceTick>,
) -> bool {
    let Some(pinned) = state.pinned_mut(event_id) else {
        return false;
    };
    if pinned.time_range != time_range {
        debug!(
            event_id,
            requested = time_range.as_str(),
            current = pinned.time_range.as_str(),
            "discarding stale backfill"
        );
        return false;
    }

    let series = normalize_backfill(ticks);
    let (Some(first), Some(last)) = (series.front().copied(), series.back().copied()) else {
        return false;
    };
    pinned.time_series = series;
    pinned.session_open_price = first.price;
    pinned.current_price = last.price;
    true
}

fn apply_outcome_history(
    state: &mut TrackerState,
    event_id: &str,
    market_id: &str,
    time_range: TimeRange,
    ticks: Vec<PriceTick>,
) -> bool {
    let Some(pinned) = state.pinned_mut(event_id) else {
        return false;
    };
    if pinned.time_range != time_range {
        return false;
    }
    let Some(outcome) = pinned
        .outcome_series
        .iter_mut()
        .find(|series| series.market_id == market_id)
    else {
        return false;
    };

    let series = normalize_backfill(ticks);
    let Some(last) = series.back().copied() else {
        return false;
    };
    outcome.ticks = series;
    outcome.current_price = last.price;
    true
}

fn apply_price_tick(state: &mut TrackerState, instrument_id: &str, tick: PriceTick) -> bool {
    let mut changed = false;

    for pinned in &mut state.pinned_groups {
        if pinned.is_binary() {
            if pinned.lead_instrument() == Some(instrument_id)
                && push_tick(&mut pinned.time_series, tick)
            {
                pinned.current_price = tick.price;
                changed = true;
            }
            continue;
        }

        for outcome in &mut pinned.outcome_series {
            if outcome.instrument_id == instrument_id && push_tick(&mut outcome.ticks, tick) {
                outcome.current_price = tick.price;
                changed = true;
            }
        }
    }

    if changed {
        state.last_tick_time = Some(tick.timestamp);
    }
    changed
}

fn set_time_range(
    state: &mut TrackerState,
    event_id: &str,
    time_range: TimeRange,
    now_ms: i64,
) -> bool {
    let Some(pinned) = state.pinned_mut(event_id) else {
        return false;
    };
    if pinned.time_range == time_range {
        return false;
    }

    pinned.time_range = time_range;
    pinned.time_series = seed_series(pinned.current_price, now_ms);
    for outcome in &mut pinned.outcome_series {
        outcome.ticks = seed_series(outcome.current_price, now_ms);
    }
    true
}

fn sync_catalog(state: &mut TrackerState, groups: Vec<MarketGroup>, now_ms: i64) -> bool {
    for pinned in &mut state.pinned_groups {
        let Some(fresh) = groups
            .iter()
            .find(|group| group.event_id == pinned.group.event_id)
        else {
            continue;
        };

        if pinned.is_binary() {
            let Some(lead) = fresh.lead_market() else {
                continue;
            };
            let same_market = pinned
                .group
                .lead_market()
                .is_some_and(|current| current.id == lead.id);
            let price = lead.lead_price();
            if same_market
                && price != pinned.current_price
                && push_tick(&mut pinned.time_series, PriceTick::new(price, now_ms))
            {
                pinned.current_price = price;
            }
            continue;
        }

        for outcome in &mut pinned.outcome_series {
            let Some(market) = fresh.market(&outcome.market_id) else {
                continue;
            };
            let price = market.lead_price();
            if price != outcome.current_price
                && push_tick(&mut outcome.ticks, PriceTick::new(price, now_ms))
            {
                outcome.current_price = price;
            }
        }
    }

    state.all_groups = groups;
    true
}

struct StoreCommand {
    action: StoreAction,
    applied: Option<oneshot::Sender<bool>>,
}

/// Cloneable front door to the store task.
#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::UnboundedSender<StoreCommand>,
    published: watch::Receiver<TrackerState>,
}

impl StoreHandle {
    fn send(&self, command: StoreCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .map_err(|_| AppError::ChannelClosed("store actions"))
    }

    pub fn dispatch(&self, action: StoreAction) -> Result<(), AppError> {
        self.send(StoreCommand {
            action,
            applied: None,
        })
    }

    /// Waits until the action has been applied and published. Resolves to whether it
    /// changed the state, so a rejected pin comes back as `false`.
    pub async fn apply(&self, action: StoreAction) -> Result<bool, AppError> {
        let (applied_tx, applied_rx) = oneshot::channel();
        self.send(StoreCommand {
            action,
            applied: Some(applied_tx),
        })?;
        applied_rx
            .await
            .map_err(|_| AppError::ChannelClosed("store reply"))
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.published.clone()
    }

    pub fn snapshot(&self) -> TrackerState {
        self.published.borrow().clone()
    }

    /// Reads the latest published state without cloning it. `read` must not block.
    pub fn with_state<R>(&self, read: impl FnOnce(&TrackerState) -> R) -> R {
        read(&self.published.borrow())
    }
}

/// Spawns the single-writer store task. It exits when the token is cancelled or every
/// handle has been dropped.
pub fn spawn_store(
    initial: TrackerState,
    cancel_token: CancellationToken,
) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<StoreCommand>();
    let (state_tx, state_rx) = watch::channel(initial);

    let join_handle = tokio::spawn(async move {
        loop {
            let StoreCommand { action, applied } = tokio::select! {
                _ = cancel_token.cancelled() => break,
                next = command_rx.recv() => match next {
                    Some(command) => command,
                    None => break,
                },
            };

            let kind = action.kind();
            let changed = state_tx.send_if_modified(|state| apply_action(state, action));
            if changed && kind != "price_tick" {
                debug!(action = kind, "store transition applied");
            }
            if let Some(applied) = applied {
                let _ = applied.send(changed);
            }
        }
        info!("store task stopped");
    });

    (
        StoreHandle {
            commands: command_tx,
            published: state_rx,
        },
        join_handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::Market;
    use proptest::prelude::*;

    fn market(id: &str, price: f64) -> Market {
        Market {
            id: id.to_string(),
            question: format!("Question {id}?"),
            group_item_title: format!("Outcome {id}"),
            instrument_ids: vec![format!("tok-{id}"), format!("tok-{id}-no")],
            outcome_prices: vec![price, 1.0 - price],
        }
    }

    fn binary_group(event_id: &str, price: f64) -> MarketGroup {
        MarketGroup {
            event_id: event_id.to_string(),
            title: format!("Event {event_id}"),
            markets: vec![market(event_id, price)],
        }
    }

    fn multi_group(event_id: &str, prices: &[f64]) -> MarketGroup {
        MarketGroup {
            event_id: event_id.to_string(),
            title: format!("Event {event_id}"),
            markets: prices
                .iter()
                .enumerate()
                .map(|(index, price)| market(&format!("{event_id}-{index}"), *price))
                .collect(),
        }
    }

    fn pin(state: TrackerState, group: MarketGroup) -> TrackerState {
        reduce(
            state,
            StoreAction::Pin {
                group,
                time_range: TimeRange::W1,
                now_ms: 1_000,
            },
        )
    }

    fn tick(state: TrackerState, instrument: &str, price: f64, timestamp: i64) -> TrackerState {
        reduce(
            state,
            StoreAction::PriceTick {
                instrument_id: instrument.to_string(),
                tick: PriceTick::new(price, timestamp),
            },
        )
    }

    #[test]
    fn pin_then_live_tick_updates_binary_series() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.62));
        let pinned = state.pinned("e1").expect("pinned");
        assert_eq!(pinned.current_price, 0.62);
        assert_eq!(pinned.session_open_price, 0.62);
        assert_eq!(pinned.time_series.len(), 1);

        let state = tick(state, "tok-e1", 0.70, 2_000);
        let pinned = state.pinned("e1").expect("pinned");
        assert_eq!(pinned.current_price, 0.70);
        assert_eq!(pinned.time_series.len(), 2);
        assert_eq!(pinned.session_open_price, 0.62);
        assert_eq!(state.last_tick_time, Some(2_000));
    }

    #[test]
    fn multi_outcome_pin_keeps_five_highest() {
        let prices = [0.05, 0.30, 0.10, 0.02, 0.25, 0.20, 0.08];
        let state = pin(TrackerState::default(), multi_group("e2", &prices));
        let pinned = state.pinned("e2").expect("pinned");

        let tracked: Vec<f64> = pinned
            .outcome_series
            .iter()
            .map(|series| series.current_price)
            .collect();
        assert_eq!(tracked, vec![0.30, 0.25, 0.20, 0.10, 0.08]);
        assert!(pinned
            .outcome_series
            .iter()
            .all(|series| series.ticks.len() == 1));
    }

    #[test]
    fn rejects_ninth_and_duplicate_pins() {
        let mut state = TrackerState::default();
        for index in 0..MAX_PINNED_GROUPS {
            state = pin(state, binary_group(&format!("e{index}"), 0.5));
        }
        let before = state.clone();

        let state = pin(state, binary_group("extra", 0.5));
        assert_eq!(state, before);

        let state = pin(state, binary_group("e0", 0.9));
        assert_eq!(state, before);
    }

    #[test]
    fn unpin_stops_routing_ticks() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let state = reduce(
            state,
            StoreAction::Unpin {
                event_id: "e1".to_string(),
            },
        );
        assert!(state.pinned_groups.is_empty());

        let revision = state.revision;
        let state = tick(state, "tok-e1", 0.6, 5_000);
        assert_eq!(state.revision, revision);
        assert_eq!(state.last_tick_time, None);
    }

    #[test]
    fn drops_ticks_that_do_not_advance() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let state = tick(state, "tok-e1", 0.6, 2_000);
        let before = state.clone();

        let state = tick(state, "tok-e1", 0.7, 2_000);
        let state = tick(state, "tok-e1", 0.8, 1_500);
        assert_eq!(state, before);
    }

    #[test]
    fn unmatched_tick_is_noop() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let before = state.clone();
        let state = tick(state, "somebody-else", 0.9, 9_000);
        assert_eq!(state, before);
    }

    #[test]
    fn routes_ticks_to_matching_outcome() {
        let state = pin(TrackerState::default(), multi_group("e3", &[0.6, 0.3]));
        let state = tick(state, "tok-e3-1", 0.35, 2_000);
        let pinned = state.pinned("e3").expect("pinned");

        let outcome = pinned.outcome("e3-1").expect("outcome");
        assert_eq!(outcome.current_price, 0.35);
        assert_eq!(outcome.ticks.len(), 2);
        assert_eq!(pinned.outcome("e3-0").expect("outcome").ticks.len(), 1);
    }

    #[test]
    fn range_switch_resets_then_backfill_replaces() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let state = tick(state, "tok-e1", 0.55, 2_000);
        let state = tick(state, "tok-e1", 0.58, 3_000);

        let state = reduce(
            state,
            StoreAction::SetTimeRange {
                event_id: "e1".to_string(),
                time_range: TimeRange::D1,
                now_ms: 4_000,
            },
        );
        let pinned = state.pinned("e1").expect("pinned");
        assert_eq!(pinned.time_range, TimeRange::D1);
        assert_eq!(
            pinned.time_series.iter().copied().collect::<Vec<_>>(),
            vec![PriceTick::new(0.58, 4_000)]
        );

        let state = reduce(
            state,
            StoreAction::ApplyHistory {
                event_id: "e1".to_string(),
                time_range: TimeRange::D1,
                ticks: vec![PriceTick::new(0.40, 100), PriceTick::new(0.45, 200)],
            },
        );
        let pinned = state.pinned("e1").expect("pinned");
        assert_eq!(pinned.time_series.len(), 2);
        assert_eq!(pinned.session_open_price, 0.40);
        assert_eq!(pinned.current_price, 0.45);
    }

    #[test]
    fn same_range_switch_is_noop() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let before = state.clone();
        let state = reduce(
            state,
            StoreAction::SetTimeRange {
                event_id: "e1".to_string(),
                time_range: TimeRange::W1,
                now_ms: 9_000,
            },
        );
        assert_eq!(state, before);
    }

    #[test]
    fn discards_stale_empty_and_orphaned_backfills() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let before = state.clone();

        let stale = reduce(
            state.clone(),
            StoreAction::ApplyHistory {
                event_id: "e1".to_string(),
                time_range: TimeRange::H1,
                ticks: vec![PriceTick::new(0.4, 1)],
            },
        );
        assert_eq!(stale, before);

        let empty = reduce(
            state.clone(),
            StoreAction::ApplyHistory {
                event_id: "e1".to_string(),
                time_range: TimeRange::W1,
                ticks: Vec::new(),
            },
        );
        assert_eq!(empty, before);

        let orphaned = reduce(
            state,
            StoreAction::ApplyOutcomeHistory {
                event_id: "e1".to_string(),
                market_id: "missing".to_string(),
                time_range: TimeRange::W1,
                ticks: vec![PriceTick::new(0.4, 1)],
            },
        );
        assert_eq!(orphaned, before);
    }

    #[test]
    fn outcome_backfill_replaces_only_that_outcome() {
        let state = pin(TrackerState::default(), multi_group("e4", &[0.7, 0.2]));
        let state = reduce(
            state,
            StoreAction::ApplyOutcomeHistory {
                event_id: "e4".to_string(),
                market_id: "e4-1".to_string(),
                time_range: TimeRange::W1,
                ticks: vec![
                    PriceTick::new(0.15, 300),
                    PriceTick::new(0.10, 100),
                    PriceTick::new(0.18, 200),
                ],
            },
        );
        let pinned = state.pinned("e4").expect("pinned");
        let outcome = pinned.outcome("e4-1").expect("outcome");
        assert_eq!(
            outcome.ticks.iter().map(|t| t.timestamp).collect::<Vec<_>>(),
            vec![100, 200, 300]
        );
        assert_eq!(outcome.current_price, 0.15);
        assert_eq!(pinned.outcome("e4-0").expect("outcome").ticks.len(), 1);
    }

    #[test]
    fn catalog_sync_appends_changed_prices_only() {
        let state = pin(TrackerState::default(), binary_group("e1", 0.5));
        let state = reduce(
            state,
            StoreAction::SyncCatalog {
                groups: vec![binary_group("e1", 0.5)],
                now_ms: 2_000,
            },
        );
        assert_eq!(state.pinned("e1").expect("pinned").time_series.len(), 1);

        let state = reduce(
            state,
            StoreAction::SyncCatalog {
                groups: vec![binary_group("e1", 0.56), binary_group("e9", 0.1)],
                now_ms: 3_000,
            },
        );
        let pinned = state.pinned("e1").expect("pinned");
        assert_eq!(pinned.time_series.len(), 2);
        assert_eq!(pinned.current_price, 0.56);
        assert_eq!(state.all_groups.len(), 2);
    }

    #[test]
    fn catalog_sync_moves_only_changed_outcomes() {
        let state = pin(TrackerState::default(), multi_group("e5", &[0.6, 0.3, 0.1]));

        let unchanged = reduce(
            state.clone(),
            StoreAction::SyncCatalog {
                groups: vec![multi_group("e5", &[0.6, 0.3, 0.1])],
                now_ms: 2_000,
            },
        );
        let pinned = unchanged.pinned("e5").expect("pinned");
        assert!(pinned
            .outcome_series
            .iter()
            .all(|series| series.ticks.len() == 1));

        let moved = reduce(
            state,
            StoreAction::SyncCatalog {
                groups: vec![multi_group("e5", &[0.6, 0.35, 0.1])],
                now_ms: 3_000,
            },
        );
        let pinned = moved.pinned("e5").expect("pinned");
        let outcome = pinned.outcome("e5-1").expect("outcome");
        assert_eq!(outcome.current_price, 0.35);
        assert_eq!(
            outcome.ticks.back().copied(),
            Some(PriceTick::new(0.35, 3_000))
        );
        assert_eq!(pinned.outcome("e5-0").expect("outcome").ticks.len(), 1);
        assert_eq!(pinned.outcome("e5-2").expect("outcome").ticks.len(), 1);
    }

    #[test]
    fn connection_status_change_bumps_revision() {
        let state = reduce(
            TrackerState::default(),
            StoreAction::SetConnectionStatus(ConnectionStatus::Connected),
        );
        assert_eq!(state.connection, ConnectionStatus::Connected);
        assert_eq!(state.revision, 1);

        let state = reduce(
            state,
            StoreAction::SetConnectionStatus(ConnectionStatus::Connected),
        );
        assert_eq!(state.revision, 1);
    }

    #[tokio::test]
    async fn actor_publishes_each_transition() {
        let cancel = CancellationToken::new();
        let (store, join) = spawn_store(TrackerState::default(), cancel.clone());
        let mut updates = store.subscribe();

        store
            .dispatch(StoreAction::Pin {
                group: binary_group("e1", 0.62),
                time_range: TimeRange::W1,
                now_ms: 1_000,
            })
            .expect("store running");
        store
            .dispatch(StoreAction::PriceTick {
                instrument_id: "tok-e1".to_string(),
                tick: PriceTick::new(0.7, 2_000),
            })
            .expect("store running");

        loop {
            updates.changed().await.expect("store alive");
            if updates.borrow_and_update().revision >= 2 {
                break;
            }
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.pinned("e1").expect("pinned").current_price, 0.7);

        cancel.cancel();
        join.await.expect("store task joins");
    }

    #[tokio::test]
    async fn apply_reports_whether_pin_took_effect() {
        let cancel = CancellationToken::new();
        let (store, join) = spawn_store(TrackerState::default(), cancel.clone());
        let pin_action = |event_id: &str| StoreAction::Pin {
            group: binary_group(event_id, 0.5),
            time_range: TimeRange::W1,
            now_ms: 1_000,
        };

        let (first, second) = tokio::join!(
            store.apply(pin_action("e1")),
            store.apply(pin_action("e1"))
        );
        let first = first.expect("store running");
        let second = second.expect("store running");
        assert!(first != second);
        assert_eq!(store.snapshot().pinned_groups.len(), 1);

        cancel.cancel();
        join.await.expect("store task joins");
        assert!(matches!(
            store.apply(pin_action("e2")).await,
            Err(AppError::ChannelClosed(_))
        ));
    }

    proptest! {
        #[test]
        fn series_never_exceeds_cap_and_keeps_newest(count in 1usize..8_000) {
            let mut series = VecDeque::new();
            for index in 0..count {
                push_tick(&mut series, PriceTick::new(0.5, index as i64));
            }
            prop_assert!(series.len() <= MAX_TICKS);
            prop_assert_eq!(series.len(), count.min(MAX_TICKS));
            prop_assert_eq!(series.back().map(|t| t.timestamp), Some(count as i64 - 1));
            prop_assert_eq!(
                series.front().map(|t| t.timestamp),
                Some(count.saturating_sub(MAX_TICKS) as i64)
            );
        }

        #[test]
        fn regressing_ticks_leave_state_unchanged(
            last in 1_000i64..1_000_000,
            back_off in 0i64..1_000,
            price in 0.0f64..=1.0,
        ) {
            let state = pin(TrackerState::default(), binary_group("e1", 0.5));
            let state = tick(state, "tok-e1", 0.5, last);
            let before = state.clone();
            let state = tick(state, "tok-e1", price, last - back_off);
            prop_assert_eq!(state, before);
        }

        #[test]
        fn pinned_count_never_exceeds_capacity(ids in proptest::collection::vec(0u8..20, 0..40)) {
            let mut state = TrackerState::default();
            for id in ids {
                state = pin(state, binary_group(&format!("e{id}"), 0.5));
                prop_assert!(state.pinned_groups.len() <= MAX_PINNED_GROUPS);
            }
            let mut ids: Vec<_> = state
                .pinned_groups
                .iter()
                .map(|p| p.event_id().to_string())
                .collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }
    }
}
