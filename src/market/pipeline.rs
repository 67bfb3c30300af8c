//! Tracker runtime: one store task plus the tasks feeding it.
//!
//! - forwarder: transport output -> `PriceTick` / `SetConnectionStatus` actions
//! - reactor: published state -> subscription diff + history requests
//! - poller: periodic catalog fetch -> `SyncCatalog`

use crate::error::AppError;
use crate::market::catalog::fetch_catalog;
use crate::market::history::HistoryFetcher;
use crate::market::now_unix_ms;
use crate::market::persistence::{load_catalog_snapshot, save_catalog_snapshot};
use crate::market::store::{spawn_store, StoreAction, StoreHandle, TrackerState};
use crate::market::subscriptions::SubscriptionManager;
use crate::market::transport::{TransportHandle, TransportOutput};
use crate::market::types::{
    CatalogSource, MarketGroup, TrackerConfig, TrackerRunState, TrackerStatusSnapshot,
};
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type StatusStore = Arc<RwLock<TrackerStatusSnapshot>>;

const EMPTY_CATALOG_REASON: &str = "no tracked events found";

pub struct TrackerHandle {
    pub config: TrackerConfig,
    pub store: StoreHandle,
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl TrackerHandle {
    /// Wraps a bare store task with no network tasks behind it.
    #[cfg(test)]
    pub(crate) fn from_store(
        config: TrackerConfig,
        store: StoreHandle,
        cancel_token: CancellationToken,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            config,
            store,
            cancel_token,
            join_handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(error) = self.join_handle.await {
            warn!(%error, "tracker supervisor ended abnormally");
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitialCatalog {
    pub groups: Vec<MarketGroup>,
    pub source: CatalogSource,
}

/// Live catalog if reachable, else the last cached one. Fails only when neither exists.
pub async fn load_initial_catalog(
    client: &Client,
    config: &TrackerConfig,
    pool: &SqlitePool,
) -> Result<InitialCatalog, AppError> {
    let fetch_error = match fetch_catalog(client, config).await {
        Ok(groups) => {
            if let Err(error) = save_catalog_snapshot(pool, &groups).await {
                warn!(%error, "failed to cache catalog");
            }
            return Ok(InitialCatalog {
                groups,
                source: CatalogSource::Live,
            });
        }
        Err(error) => error,
    };

    warn!(error = %fetch_error, "initial catalog fetch failed, trying cache");
    match load_catalog_snapshot(pool).await {
        Ok(Some(snapshot)) => {
            info!(
                groups = snapshot.groups.len(),
                cached_at_ms = snapshot.updated_at_ms,
                "using cached catalog"
            );
            Ok(InitialCatalog {
                groups: snapshot.groups,
                source: CatalogSource::Cache,
            })
        }
        Ok(None) => Err(AppError::CatalogUnavailable(fetch_error.to_string())),
        Err(cache_error) => {
            warn!(error = %cache_error, "catalog cache unreadable");
            Err(AppError::CatalogUnavailable(fetch_error.to_string()))
        }
    }
}

async fn publish_status(
    status_store: &StatusStore,
    state: TrackerRunState,
    reason: Option<String>,
) {
    {
        let mut writable = status_store.write().await;
        writable.state = state;
        writable.reason = reason.clone();
    }
    info!(state = ?state, reason = reason.as_deref().unwrap_or(""), "tracker status");
}

fn auto_pin(
    store: &StoreHandle,
    groups: &[MarketGroup],
    config: &TrackerConfig,
) -> Result<(), AppError> {
    let now_ms = now_unix_ms();
    for group in groups.iter().take(config.auto_pin_count) {
        debug!(event_id = %group.event_id, "auto-pinning group");
        store.dispatch(StoreAction::Pin {
            group: group.clone(),
            time_range: config.default_time_range,
            now_ms,
        })?;
    }
    Ok(())
}

/// Loads the catalog, seeds the store and spawns the runtime tasks. `requested_pins` are
/// event ids pinned after auto-pinning; unknown ids are skipped.
pub async fn start_tracker(
    config: TrackerConfig,
    pool: SqlitePool,
    status_store: StatusStore,
    requested_pins: Vec<String>,
) -> Result<TrackerHandle, AppError> {
    {
        let mut writable = status_store.write().await;
        *writable = TrackerStatusSnapshot {
            state: TrackerRunState::Starting,
            ..TrackerStatusSnapshot::stopped(Some("loading catalog".to_string()))
        };
    }

    let client = Client::builder().timeout(config.history_timeout).build()?;
    let initial = match load_initial_catalog(&client, &config, &pool).await {
        Ok(initial) => initial,
        Err(error) => {
            publish_status(&status_store, TrackerRunState::Error, Some(error.to_string())).await;
            return Err(error);
        }
    };

    let cancel_token = CancellationToken::new();
    let (store, store_join) = spawn_store(TrackerState::default(), cancel_token.child_token());
    store.dispatch(StoreAction::SetCatalog {
        groups: initial.groups.clone(),
    })?;

    let mut auto_pinned = false;
    if initial.source == CatalogSource::Live && !initial.groups.is_empty() {
        auto_pin(&store, &initial.groups, &config)?;
        auto_pinned = true;
    }
    let now_ms = now_unix_ms();
    for event_id in requested_pins {
        match initial.groups.iter().find(|group| group.event_id == event_id) {
            Some(group) => store.dispatch(StoreAction::Pin {
                group: group.clone(),
                time_range: config.default_time_range,
                now_ms,
            })?,
            None => warn!(%event_id, "requested pin not in catalog"),
        }
    }

    let (transport, transport_output) = TransportHandle::spawn(
        config.stream_url.clone(),
        config.heartbeat_interval,
        cancel_token.child_token(),
    );
    let fetcher = HistoryFetcher::new(
        client.clone(),
        config.clob_url.clone(),
        config.history_timeout,
        store.clone(),
        cancel_token.child_token(),
    );

    let forwarder = tokio::spawn(run_forwarder(
        transport_output,
        store.clone(),
        Arc::clone(&status_store),
        cancel_token.clone(),
    ));
    let reactor = tokio::spawn(run_reactor(
        store.clone(),
        transport,
        fetcher,
        cancel_token.clone(),
    ));
    let poller = tokio::spawn(run_catalog_poller(
        client,
        config.clone(),
        pool,
        store.clone(),
        Arc::clone(&status_store),
        auto_pinned,
        cancel_token.clone(),
    ));

    {
        let mut writable = status_store.write().await;
        writable.catalog_source = initial.source;
    }
    let reason = initial.groups.is_empty().then(|| EMPTY_CATALOG_REASON.to_string());
    publish_status(&status_store, TrackerRunState::Running, reason).await;

    let join_handle = tokio::spawn(supervise(
        cancel_token.clone(),
        status_store,
        store_join,
        forwarder,
        reactor,
        poller,
    ));

    Ok(TrackerHandle {
        config,
        store,
        cancel_token,
        join_handle,
    })
}

async fn supervise(
    cancel_token: CancellationToken,
    status_store: StatusStore,
    store_join: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    reactor: JoinHandle<TransportHandle>,
    poller: JoinHandle<()>,
) {
    cancel_token.cancelled().await;

    match reactor.await {
        Ok(transport) => transport.shutdown().await,
        Err(error) => warn!(%error, "reactor task ended abnormally"),
    }
    for (name, handle) in [("forwarder", forwarder), ("poller", poller), ("store", store_join)] {
        if let Err(error) = handle.await {
            warn!(task = name, %error, "tracker task ended abnormally");
        }
    }

    {
        let mut writable = status_store.write().await;
        *writable = TrackerStatusSnapshot::stopped(Some("tracker stopped".to_string()));
    }
    info!("tracker stopped");
}

async fn run_forwarder(
    mut outputs: mpsc::Receiver<TransportOutput>,
    store: StoreHandle,
    status_store: StatusStore,
    cancel_token: CancellationToken,
) {
    loop {
        let output = tokio::select! {
            _ = cancel_token.cancelled() => break,
            next = outputs.recv() => match next {
                Some(output) => output,
                None => break,
            },
        };

        let action = match output {
            TransportOutput::Status(status) => {
                status_store.write().await.connection = status;
                info!(status = ?status, "stream connection status");
                StoreAction::SetConnectionStatus(status)
            }
            TransportOutput::Price(event) => {
                let tick = event.tick();
                StoreAction::PriceTick {
                    instrument_id: event.instrument_id,
                    tick,
                }
            }
        };
        if store.dispatch(action).is_err() {
            break;
        }
    }
}

fn reconcile(
    state: &TrackerState,
    subscriptions: &mut SubscriptionManager,
    transport: &TransportHandle,
    fetcher: &HistoryFetcher,
) {
    if let Err(error) = subscriptions.sync(&state.pinned_groups, transport) {
        warn!(%error, "failed to apply subscription diff");
    }
    let started = fetcher.on_pinned_changed(&state.pinned_groups);
    if started > 0 {
        debug!(started, "history fetches started");
    }
}

/// Returns the transport so the supervisor can shut it down after the last diff.
async fn run_reactor(
    store: StoreHandle,
    transport: TransportHandle,
    fetcher: HistoryFetcher,
    cancel_token: CancellationToken,
) -> TransportHandle {
    let mut updates = store.subscribe();
    let mut subscriptions = SubscriptionManager::new();

    reconcile(&updates.borrow_and_update(), &mut subscriptions, &transport, &fetcher);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                reconcile(&updates.borrow_and_update(), &mut subscriptions, &transport, &fetcher);
            }
        }
    }
    transport
}

async fn run_catalog_poller(
    client: Client,
    config: TrackerConfig,
    pool: SqlitePool,
    store: StoreHandle,
    status_store: StatusStore,
    mut auto_pinned: bool,
    cancel_token: CancellationToken,
) {
    let period = config.catalog_poll_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let fetched = tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = interval.tick() => tokio::select! {
                _ = cancel_token.cancelled() => break,
                fetched = fetch_catalog(&client, &config) => fetched,
            },
        };

        let groups = match fetched {
            Ok(groups) if groups.is_empty() => {
                debug!("catalog poll returned no tracked events");
                continue;
            }
            Ok(groups) => groups,
            Err(error) => {
                warn!(%error, "catalog poll failed");
                continue;
            }
        };

        if let Err(error) = save_catalog_snapshot(&pool, &groups).await {
            warn!(%error, "failed to cache catalog");
        }
        {
            let mut writable = status_store.write().await;
            writable.catalog_source = CatalogSource::Live;
            if writable.reason.as_deref() == Some(EMPTY_CATALOG_REASON) {
                writable.reason = None;
            }
        }

        let sync = StoreAction::SyncCatalog {
            groups: groups.clone(),
            now_ms: now_unix_ms(),
        };
        if store.dispatch(sync).is_err() {
            break;
        }
        if !auto_pinned {
            auto_pinned = true;
            if auto_pin(&store, &groups, &config).is_err() {
                break;
            }
        }
    }
}
