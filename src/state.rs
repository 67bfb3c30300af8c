use crate::market::pipeline::{StatusStore, TrackerHandle};
use crate::market::types::TrackerStatusSnapshot;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub tracker: Mutex<Option<TrackerHandle>>,
    pub tracker_status: StatusStore,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        let tracker_status = TrackerStatusSnapshot::stopped(Some("tracker idle".to_string()));

        Self {
            started_at: Instant::now(),
            db_pool,
            tracker: Mutex::new(None),
            tracker_status: Arc::new(RwLock::new(tracker_status)),
        }
    }
}
