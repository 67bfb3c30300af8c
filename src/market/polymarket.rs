use crate::error::AppError;
use crate::market::catalog::GammaEventWire;
use crate::market::types::{PriceHistoryWire, PriceTick, TimeRange};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub type MarketWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const HEARTBEAT_FRAME: &str = "PING";

#[derive(Debug, Serialize)]
struct HandshakeWire<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    channel: &'static str,
}

#[derive(Debug, Serialize)]
struct SubscriptionOpWire<'a> {
    operation: &'static str,
    assets_ids: &'a [String],
}

pub fn handshake_message() -> Result<String, AppError> {
    Ok(simd_json::serde::to_string(&HandshakeWire {
        assets_ids: &[],
        channel: "market",
    })?)
}

pub fn subscribe_message(instrument_ids: &[String]) -> Result<String, AppError> {
    subscription_message("subscribe", instrument_ids)
}

pub fn unsubscribe_message(instrument_ids: &[String]) -> Result<String, AppError> {
    subscription_message("unsubscribe", instrument_ids)
}

fn subscription_message(
    operation: &'static str,
    instrument_ids: &[String],
) -> Result<String, AppError> {
    Ok(simd_json::serde::to_string(&SubscriptionOpWire {
        operation,
        assets_ids: instrument_ids,
    })?)
}

fn prices_history_endpoint(clob_url: &str, instrument_id: &str, time_range: TimeRange) -> String {
    let (interval, fidelity) = time_range.history_params();
    format!("{clob_url}/prices-history")
        + &format!("?market={instrument_id}&interval={interval}&fidelity={fidelity}")
}

fn events_endpoint(gamma_url: &str, limit: u16, offset: u32) -> String {
    format!("{gamma_url}/events")
        + &format!("?limit={limit}&offset={offset}&order=volume24hr&ascending=false")
}

pub async fn connect_market_stream(stream_url: &str) -> Result<MarketWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(stream_url, Some(ws_config), true).await?;
    Ok(stream)
}

/// Raw history points for one instrument, oldest first as returned by the venue.
/// Points with prices outside [0, 1] are skipped.
pub async fn fetch_price_history(
    client: &Client,
    clob_url: &str,
    instrument_id: &str,
    time_range: TimeRange,
) -> Result<Vec<PriceTick>, AppError> {
    let endpoint = prices_history_endpoint(clob_url, instrument_id, time_range);
    let response = client.get(endpoint).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    let payload = response.error_for_status()?.json::<PriceHistoryWire>().await?;

    let total = payload.history.len();
    let ticks: Vec<PriceTick> = payload
        .history
        .into_iter()
        .filter_map(|point| PriceTick::try_from(point).ok())
        .collect();
    if ticks.len() != total {
        debug!(instrument_id, skipped = total - ticks.len(), "dropped invalid history points");
    }
    Ok(ticks)
}

pub async fn fetch_events_page(
    client: &Client,
    gamma_url: &str,
    limit: u16,
    offset: u32,
) -> Result<Vec<GammaEventWire>, AppError> {
    let endpoint = events_endpoint(gamma_url, limit, offset);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<GammaEventWire>>().await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_endpoint_maps_range_to_interval_and_fidelity() {
        let endpoint = prices_history_endpoint("https://clob.example", "123", TimeRange::W1);
        assert!(endpoint.starts_with("https://clob.example/prices-history?"));
        assert!(endpoint.contains("market=123"));
        assert!(endpoint.contains("interval=1w"));
        assert!(endpoint.contains("fidelity=60"));

        let live = prices_history_endpoint("https://clob.example", "123", TimeRange::Live);
        assert!(live.contains("interval=1h"));
        assert!(live.contains("fidelity=1"));
    }

    #[test]
    fn events_endpoint_pages_by_volume() {
        let endpoint = events_endpoint("https://gamma.example", 500, 1_000);
        assert!(endpoint.contains("limit=500"));
        assert!(endpoint.contains("offset=1000"));
        assert!(endpoint.contains("order=volume24hr"));
        assert!(endpoint.contains("ascending=false"));
    }

    #[test]
    fn encodes_handshake_and_subscription_ops() {
        let handshake = handshake_message().expect("encodes");
        assert_eq!(handshake, r#"{"assets_ids":[],"type":"market"}"#);

        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            subscribe_message(&ids).expect("encodes"),
            r#"{"operation":"subscribe","assets_ids":["a","b"]}"#
        );
        assert_eq!(
            unsubscribe_message(&ids[..1]).expect("encodes"),
            r#"{"operation":"unsubscribe","assets_ids":["a"]}"#
        );
    }
}
