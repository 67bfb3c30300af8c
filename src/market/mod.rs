pub mod catalog;
pub mod history;
pub mod persistence;
pub mod pipeline;
pub mod polymarket;
pub mod store;
pub mod subscriptions;
pub mod transport;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
