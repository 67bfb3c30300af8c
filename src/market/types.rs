use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub const MAX_PINNED_GROUPS: usize = 8;
pub const MAX_OUTCOMES: usize = 5;
pub const MAX_TICKS: usize = 3_600;

pub const DEFAULT_STREAM_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
pub const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";
pub const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_KEYWORDS: &[&str] = &["big game", "super bowl", "halftime", "national anthem"];
pub const DEFAULT_AUTO_PIN_COUNT: usize = 4;
pub const DEFAULT_CATALOG_POLL_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_HISTORY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_TIME_RANGE: TimeRange = TimeRange::W1;
pub const DEFAULT_CATALOG_PAGE_SIZE: u16 = 500;
pub const DEFAULT_CATALOG_MAX_PAGES: u16 = 4;
pub const MIN_CATALOG_POLL_INTERVAL_MS: u64 = 5_000;
pub const MAX_CATALOG_POLL_INTERVAL_MS: u64 = 300_000;
pub const MIN_HISTORY_TIMEOUT_MS: u64 = 1_000;
pub const MAX_HISTORY_TIMEOUT_MS: u64 = 60_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 120_000;
pub const MAX_CATALOG_PAGE_SIZE: u16 = 500;
pub const MAX_CATALOG_PAGES: u16 = 20;

/// Lookback window used for history fetches and chart resets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeRange {
    #[serde(rename = "live")]
    Live,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1m")]
    Mo1,
}

impl TimeRange {
    pub const ALL: [TimeRange; 5] = [Self::Live, Self::H1, Self::D1, Self::W1, Self::Mo1];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::H1 => "1h",
            Self::D1 => "1d",
            Self::W1 => "1w",
            Self::Mo1 => "1m",
        }
    }

    pub fn parse_str(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == normalized)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "unknown time range '{raw}', expected one of live, 1h, 1d, 1w, 1m"
                ))
            })
    }

    /// Interval and fidelity (minutes per point) for the prices-history endpoint.
    pub fn history_params(self) -> (&'static str, u32) {
        match self {
            Self::Live => ("1h", 1),
            Self::H1 => ("1h", 1),
            Self::D1 => ("1d", 5),
            Self::W1 => ("1w", 60),
            Self::Mo1 => ("1m", 360),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub price: f64,
    pub timestamp: i64,
}

impl PriceTick {
    pub fn new(price: f64, timestamp: i64) -> Self {
        Self { price, timestamp }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub question: String,
    pub group_item_title: String,
    pub instrument_ids: Vec<String>,
    pub outcome_prices: Vec<f64>,
}

impl Market {
    pub fn lead_instrument(&self) -> Option<&str> {
        self.instrument_ids
            .first()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn lead_price(&self) -> f64 {
        self.outcome_prices
            .first()
            .copied()
            .filter(|price| price.is_finite())
            .unwrap_or(0.0)
    }

    pub fn display_label(&self) -> &str {
        if self.group_item_title.trim().is_empty() {
            &self.question
        } else {
            &self.group_item_title
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketGroup {
    pub event_id: String,
    pub title: String,
    /// Sorted by lead price, highest first.
    pub markets: Vec<Market>,
}

impl MarketGroup {
    pub fn is_binary(&self) -> bool {
        self.markets.len() == 1
    }

    pub fn lead_market(&self) -> Option<&Market> {
        self.markets.first()
    }

    pub fn market(&self, market_id: &str) -> Option<&Market> {
        self.markets.iter().find(|market| market.id == market_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSeries {
    pub market_id: String,
    pub label: String,
    pub instrument_id: String,
    pub ticks: VecDeque<PriceTick>,
    pub current_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedGroup {
    pub group: MarketGroup,
    pub time_range: TimeRange,
    /// Binary groups only.
    pub time_series: VecDeque<PriceTick>,
    pub session_open_price: f64,
    pub current_price: f64,
    /// Multi-outcome groups only, fixed at pin time.
    pub outcome_series: Vec<OutcomeSeries>,
}

impl PinnedGroup {
    pub fn event_id(&self) -> &str {
        &self.group.event_id
    }

    pub fn is_binary(&self) -> bool {
        self.group.is_binary()
    }

    pub fn lead_instrument(&self) -> Option<&str> {
        self.group.lead_market().and_then(Market::lead_instrument)
    }

    pub fn outcome(&self, market_id: &str) -> Option<&OutcomeSeries> {
        self.outcome_series
            .iter()
            .find(|series| series.market_id == market_id)
    }
}

/// One price observation decoded from the stream, addressed by instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEvent {
    pub instrument_id: String,
    pub price: f64,
    pub timestamp: i64,
}

impl PriceEvent {
    pub fn tick(&self) -> PriceTick {
        PriceTick::new(self.price, self.timestamp)
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamEventWire {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub price_changes: Option<Vec<PriceChangeWire>>,
}

#[derive(Debug, Deserialize)]
pub struct PriceChangeWire {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

pub fn parse_unit_price(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite() && (0.0..=1.0).contains(price))
}

fn parse_positive(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn parse_event_timestamp(raw: Option<&str>, received_at_ms: i64) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(received_at_ms)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|value| !value.trim().is_empty())
}

/// Midpoint of the touch when both sides are quoted, else the explicit price field.
pub fn derive_book_price(change: &PriceChangeWire) -> Option<f64> {
    let best_bid = parse_positive(change.best_bid.as_deref());
    let best_ask = parse_positive(change.best_ask.as_deref());
    match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => {
            let midpoint = (bid + ask) / 2.0;
            (midpoint.is_finite() && (0.0..=1.0).contains(&midpoint)).then_some(midpoint)
        }
        _ => change.price.as_deref().and_then(parse_unit_price),
    }
}

impl StreamEventWire {
    pub fn into_price_events(self, received_at_ms: i64) -> Vec<PriceEvent> {
        match self.event_type.as_deref() {
            Some("last_trade_price") => {
                let Some(instrument_id) = non_empty(self.asset_id) else {
                    return Vec::new();
                };
                let Some(price) = self.price.as_deref().and_then(parse_unit_price) else {
                    return Vec::new();
                };
                vec![PriceEvent {
                    instrument_id,
                    price,
                    timestamp: parse_event_timestamp(self.timestamp.as_deref(), received_at_ms),
                }]
            }
            Some("price_change") => {
                let timestamp = parse_event_timestamp(self.timestamp.as_deref(), received_at_ms);
                self.price_changes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|change| {
                        let price = derive_book_price(&change)?;
                        let instrument_id = non_empty(change.asset_id)?;
                        Some(PriceEvent {
                            instrument_id,
                            price,
                            timestamp,
                        })
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Decodes one inbound frame: a single event object or an array of them.
/// Elements that do not match the event shape are skipped.
pub fn parse_stream_payload(
    payload: &mut [u8],
    received_at_ms: i64,
) -> Result<Vec<PriceEvent>, AppError> {
    let is_batch = payload
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'[');

    let values: Vec<simd_json::OwnedValue> = if is_batch {
        simd_json::serde::from_slice(payload)?
    } else {
        vec![simd_json::serde::from_slice(payload)?]
    };

    let mut events = Vec::new();
    for value in values {
        if let Ok(wire) = simd_json::serde::from_owned_value::<StreamEventWire>(value) {
            events.extend(wire.into_price_events(received_at_ms));
        }
    }
    Ok(events)
}

pub fn is_heartbeat_ack(frame: &str) -> bool {
    frame.trim().eq_ignore_ascii_case("PONG")
}

#[derive(Debug, Deserialize)]
pub struct PriceHistoryWire {
    #[serde(default)]
    pub history: Vec<PricePointWire>,
}

#[derive(Debug, Deserialize)]
pub struct PricePointWire {
    pub t: i64,
    pub p: f64,
}

impl TryFrom<PricePointWire> for PriceTick {
    type Error = AppError;

    fn try_from(value: PricePointWire) -> Result<Self, Self::Error> {
        if !value.p.is_finite() || !(0.0..=1.0).contains(&value.p) {
            return Err(AppError::InvalidArgument(format!(
                "history price {} outside [0, 1]",
                value.p
            )));
        }
        Ok(Self {
            price: value.p,
            timestamp: value.t.saturating_mul(1_000),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerRunState {
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    Live,
    Cache,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatusSnapshot {
    pub state: TrackerRunState,
    pub connection: ConnectionStatus,
    pub pinned_count: usize,
    pub last_tick_time: Option<i64>,
    pub catalog_source: CatalogSource,
    pub reason: Option<String>,
}

impl TrackerStatusSnapshot {
    pub fn stopped(reason: Option<String>) -> Self {
        Self {
            state: TrackerRunState::Stopped,
            connection: ConnectionStatus::Disconnected,
            pinned_count: 0,
            last_tick_time: None,
            catalog_source: CatalogSource::None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTrackerArgs {
    pub stream_url: Option<String>,
    pub clob_url: Option<String>,
    pub gamma_url: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub auto_pin_count: Option<usize>,
    pub catalog_poll_interval_ms: Option<u64>,
    pub history_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub default_time_range: Option<TimeRange>,
    pub catalog_page_size: Option<u16>,
    pub catalog_max_pages: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub stream_url: String,
    pub clob_url: String,
    pub gamma_url: String,
    pub keywords: Vec<String>,
    pub auto_pin_count: usize,
    pub catalog_poll_interval: Duration,
    pub history_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub default_time_range: TimeRange,
    pub catalog_page_size: u16,
    pub catalog_max_pages: u16,
}

fn normalize_url(raw: Option<String>, default: &str, schemes: &[&str]) -> Result<String, AppError> {
    let url = raw
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string());
    if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(AppError::InvalidArgument(format!(
            "url '{url}' must start with one of {schemes:?}"
        )));
    }
    Ok(url)
}

impl StartTrackerArgs {
    pub fn normalize(self) -> Result<TrackerConfig, AppError> {
        let stream_url = normalize_url(self.stream_url, DEFAULT_STREAM_URL, &["ws://", "wss://"])?;
        let clob_url = normalize_url(self.clob_url, DEFAULT_CLOB_URL, &["http://", "https://"])?;
        let gamma_url = normalize_url(self.gamma_url, DEFAULT_GAMMA_URL, &["http://", "https://"])?;

        let keywords: Vec<String> = self
            .keywords
            .unwrap_or_else(|| DEFAULT_KEYWORDS.iter().map(|kw| kw.to_string()).collect())
            .into_iter()
            .map(|kw| kw.trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(AppError::InvalidArgument(
                "keywords must contain at least one non-empty entry".to_string(),
            ));
        }

        let auto_pin_count = self.auto_pin_count.unwrap_or(DEFAULT_AUTO_PIN_COUNT);
        if auto_pin_count > MAX_PINNED_GROUPS {
            return Err(AppError::InvalidArgument(format!(
                "autoPinCount must be at most {MAX_PINNED_GROUPS}"
            )));
        }

        let catalog_poll_interval_ms = self
            .catalog_poll_interval_ms
            .unwrap_or(DEFAULT_CATALOG_POLL_INTERVAL_MS);
        if !(MIN_CATALOG_POLL_INTERVAL_MS..=MAX_CATALOG_POLL_INTERVAL_MS)
            .contains(&catalog_poll_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "catalogPollIntervalMs must be between {MIN_CATALOG_POLL_INTERVAL_MS} and {MAX_CATALOG_POLL_INTERVAL_MS}"
            )));
        }

        let history_timeout_ms = self.history_timeout_ms.unwrap_or(DEFAULT_HISTORY_TIMEOUT_MS);
        if !(MIN_HISTORY_TIMEOUT_MS..=MAX_HISTORY_TIMEOUT_MS).contains(&history_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "historyTimeoutMs must be between {MIN_HISTORY_TIMEOUT_MS} and {MAX_HISTORY_TIMEOUT_MS}"
            )));
        }

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        let catalog_page_size = self.catalog_page_size.unwrap_or(DEFAULT_CATALOG_PAGE_SIZE);
        if !(1..=MAX_CATALOG_PAGE_SIZE).contains(&catalog_page_size) {
            return Err(AppError::InvalidArgument(format!(
                "catalogPageSize must be between 1 and {MAX_CATALOG_PAGE_SIZE}"
            )));
        }

        let catalog_max_pages = self.catalog_max_pages.unwrap_or(DEFAULT_CATALOG_MAX_PAGES);
        if !(1..=MAX_CATALOG_PAGES).contains(&catalog_max_pages) {
            return Err(AppError::InvalidArgument(format!(
                "catalogMaxPages must be between 1 and {MAX_CATALOG_PAGES}"
            )));
        }

        Ok(TrackerConfig {
            stream_url,
            clob_url,
            gamma_url,
            keywords,
            auto_pin_count,
            catalog_poll_interval: Duration::from_millis(catalog_poll_interval_ms),
            history_timeout: Duration::from_millis(history_timeout_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            default_time_range: self.default_time_range.unwrap_or(DEFAULT_TIME_RANGE),
            catalog_page_size,
            catalog_max_pages,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSession {
    pub running: bool,
    pub stream_url: String,
    pub keywords: Vec<String>,
    pub auto_pin_count: usize,
    pub catalog_poll_interval_ms: u64,
    pub history_timeout_ms: u64,
    pub default_time_range: TimeRange,
}

impl TrackerSession {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            running: true,
            stream_url: config.stream_url.clone(),
            keywords: config.keywords.clone(),
            auto_pin_count: config.auto_pin_count,
            catalog_poll_interval_ms: config.catalog_poll_interval.as_millis() as u64,
            history_timeout_ms: config.history_timeout.as_millis() as u64,
            default_time_range: config.default_time_range,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStopResult {
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Vec<PriceEvent> {
        let mut payload = raw.as_bytes().to_vec();
        parse_stream_payload(&mut payload, 42).expect("payload should parse")
    }

    #[test]
    fn decodes_last_trade_price_verbatim() {
        let events = decode(
            r#"{"event_type":"last_trade_price","asset_id":"tok-1","price":"0.57","timestamp":"1739000000123"}"#,
        );

        assert_eq!(
            events,
            vec![PriceEvent {
                instrument_id: "tok-1".to_string(),
                price: 0.57,
                timestamp: 1_739_000_000_123,
            }]
        );
    }

    #[test]
    fn derives_midpoint_from_price_change() {
        let events = decode(
            r#"[{"event_type":"price_change","timestamp":"1000","price_changes":[{"asset_id":"tok-2","best_bid":"0.40","best_ask":"0.46","price":"0.50"}]}]"#,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instrument_id, "tok-2");
        assert!((events[0].price - 0.43).abs() < 1e-9);
        assert_eq!(events[0].timestamp, 1_000);
    }

    #[test]
    fn falls_back_to_explicit_price_when_book_side_missing() {
        let events = decode(
            r#"{"event_type":"price_change","price_changes":[{"asset_id":"a","best_bid":"0","best_ask":"0.6","price":"0.55"},{"asset_id":"b","best_bid":"0.2"}]}"#,
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instrument_id, "a");
        assert_eq!(events[0].price, 0.55);
        assert_eq!(events[0].timestamp, 42);
    }

    #[test]
    fn ignores_unknown_and_malformed_events() {
        assert!(decode(r#"{"event_type":"book","asset_id":"x"}"#).is_empty());
        assert!(decode(r#"{"asset_id":"x","price":"0.5"}"#).is_empty());
        let unparseable = r#"[{"event_type":"last_trade_price","asset_id":"x","price":"nope"}, 7]"#;
        assert!(decode(unparseable).is_empty());
        let out_of_range = r#"{"event_type":"last_trade_price","asset_id":"x","price":"1.7"}"#;
        assert!(decode(out_of_range).is_empty());
    }

    #[test]
    fn rejects_non_json_frames() {
        let mut payload = b"PONG".to_vec();
        assert!(parse_stream_payload(&mut payload, 0).is_err());
        assert!(is_heartbeat_ack("pong"));
        assert!(is_heartbeat_ack(" PONG "));
        assert!(!is_heartbeat_ack("PING"));
    }

    #[test]
    fn time_range_round_trips_through_str() {
        for range in TimeRange::ALL {
            assert_eq!(TimeRange::parse_str(range.as_str()).ok(), Some(range));
        }
        assert!(TimeRange::parse_str("5y").is_err());
        assert_eq!(TimeRange::D1.history_params(), ("1d", 5));
    }

    #[test]
    fn converts_history_points_to_millisecond_ticks() {
        let tick = PriceTick::try_from(PricePointWire { t: 1_700_000_000, p: 0.25 })
            .expect("valid point");
        assert_eq!(tick.timestamp, 1_700_000_000_000);
        assert!(PriceTick::try_from(PricePointWire { t: 1, p: f64::NAN }).is_err());
    }

    #[test]
    fn market_label_falls_back_to_question() {
        let market = Market {
            id: "m".to_string(),
            question: "Will it happen?".to_string(),
            group_item_title: " ".to_string(),
            instrument_ids: vec![String::new()],
            outcome_prices: vec![],
        };
        assert_eq!(market.display_label(), "Will it happen?");
        assert_eq!(market.lead_instrument(), None);
        assert_eq!(market.lead_price(), 0.0);
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartTrackerArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(config.keywords.len(), DEFAULT_KEYWORDS.len());
        assert_eq!(config.auto_pin_count, DEFAULT_AUTO_PIN_COUNT);
        assert_eq!(
            config.catalog_poll_interval,
            Duration::from_millis(DEFAULT_CATALOG_POLL_INTERVAL_MS)
        );
        assert_eq!(
            config.history_timeout,
            Duration::from_millis(DEFAULT_HISTORY_TIMEOUT_MS)
        );
        assert_eq!(config.default_time_range, DEFAULT_TIME_RANGE);
    }

    #[test]
    fn validates_auto_pin_count() {
        let result = StartTrackerArgs {
            auto_pin_count: Some(9),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_poll_interval_and_urls() {
        let poll = StartTrackerArgs {
            catalog_poll_interval_ms: Some(100),
            ..Default::default()
        }
        .normalize();
        assert!(poll.is_err());

        let url = StartTrackerArgs {
            stream_url: Some("https://not-a-socket".to_string()),
            ..Default::default()
        }
        .normalize();
        assert!(url.is_err());

        let keywords = StartTrackerArgs {
            keywords: Some(vec!["  ".to_string()]),
            ..Default::default()
        }
        .normalize();
        assert!(keywords.is_err());
    }
}
