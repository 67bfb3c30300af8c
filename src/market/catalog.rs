use crate::error::AppError;
use crate::market::polymarket::fetch_events_page;
use crate::market::types::{Market, MarketGroup, TrackerConfig};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GammaIdWire {
    Text(String),
    Number(i64),
}

impl GammaIdWire {
    fn into_string(self) -> String {
        match self {
            Self::Text(value) => value,
            Self::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaEventWire {
    pub id: GammaIdWire,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub markets: Vec<GammaMarketWire>,
}

/// `outcomePrices` and `clobTokenIds` are JSON arrays encoded as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarketWire {
    pub id: GammaIdWire,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub outcome_prices: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub group_item_title: Option<String>,
}

pub fn is_tracked_event(event: &GammaEventWire, keywords: &[String]) -> bool {
    let haystack = format!("{} {}", event.title, event.slug).to_lowercase();
    keywords.iter().any(|keyword| haystack.contains(keyword.as_str()))
}

fn decode_string_array(raw: Option<&str>) -> Result<Vec<String>, AppError> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let mut bytes = raw.as_bytes().to_vec();
    Ok(simd_json::serde::from_slice::<Vec<String>>(&mut bytes)?)
}

pub fn parse_market(raw: GammaMarketWire) -> Result<Market, AppError> {
    let outcome_prices = decode_string_array(raw.outcome_prices.as_deref())?
        .iter()
        .map(|price| price.trim().parse::<f64>().unwrap_or(0.0))
        .collect();
    let instrument_ids = decode_string_array(raw.clob_token_ids.as_deref())?;

    Ok(Market {
        id: raw.id.into_string(),
        question: raw.question,
        group_item_title: raw.group_item_title.unwrap_or_default(),
        instrument_ids,
        outcome_prices,
    })
}

/// Keeps keyword-matching events with at least one open market; markets are ordered by
/// descending lead price.
pub fn build_groups(events: Vec<GammaEventWire>, keywords: &[String]) -> Vec<MarketGroup> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();

    for event in events {
        if !is_tracked_event(&event, keywords) {
            continue;
        }
        let event_id = event.id.into_string();
        if !seen.insert(event_id.clone()) {
            continue;
        }

        let mut markets: Vec<Market> = event
            .markets
            .into_iter()
            .filter(|market| market.active && !market.closed)
            .filter_map(|raw| match parse_market(raw) {
                Ok(market) => Some(market),
                Err(error) => {
                    debug!(%event_id, %error, "skipping undecodable market");
                    None
                }
            })
            .collect();
        if markets.is_empty() {
            continue;
        }
        markets.sort_by(|lhs, rhs| rhs.lead_price().total_cmp(&lhs.lead_price()));

        groups.push(MarketGroup {
            event_id,
            title: event.title,
            markets,
        });
    }

    groups
}

pub async fn fetch_catalog(
    client: &Client,
    config: &TrackerConfig,
) -> Result<Vec<MarketGroup>, AppError> {
    let page_size = config.catalog_page_size;
    let mut events = Vec::new();

    for page in 0..config.catalog_max_pages {
        let offset = u32::from(page) * u32::from(page_size);
        let batch = fetch_events_page(client, &config.gamma_url, page_size, offset).await?;
        let batch_len = batch.len();
        events.extend(batch);
        if batch_len < usize::from(page_size) {
            break;
        }
    }

    let total = events.len();
    let groups = build_groups(events, &config.keywords);
    info!(events = total, groups = groups.len(), "catalog fetched");
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        vec!["super bowl".to_string(), "halftime".to_string()]
    }

    fn raw_market(id: &str, prices: &str, active: bool, closed: bool) -> GammaMarketWire {
        GammaMarketWire {
            id: GammaIdWire::Text(id.to_string()),
            question: format!("Will {id} happen?"),
            outcome_prices: Some(prices.to_string()),
            clob_token_ids: Some(format!(r#"["tok-{id}","tok-{id}-no"]"#)),
            active,
            closed,
            group_item_title: None,
        }
    }

    fn event(id: i64, title: &str, markets: Vec<GammaMarketWire>) -> GammaEventWire {
        GammaEventWire {
            id: GammaIdWire::Number(id),
            title: title.to_string(),
            slug: String::new(),
            markets,
        }
    }

    #[test]
    fn decodes_string_encoded_arrays() {
        let market = parse_market(raw_market("m1", r#"["0.62","0.38"]"#, true, false))
            .expect("market should parse");
        assert_eq!(market.outcome_prices, vec![0.62, 0.38]);
        assert_eq!(market.instrument_ids, vec!["tok-m1", "tok-m1-no"]);
        assert_eq!(market.display_label(), "Will m1 happen?");
    }

    #[test]
    fn non_numeric_prices_default_to_zero() {
        let market = parse_market(raw_market("m1", r#"["n/a"]"#, true, false))
            .expect("market should parse");
        assert_eq!(market.lead_price(), 0.0);
    }

    #[test]
    fn matches_keywords_on_title_or_slug() {
        let by_title = event(1, "Super Bowl LIX winner", Vec::new());
        assert!(is_tracked_event(&by_title, &keywords()));

        let mut by_slug = event(2, "Who performs?", Vec::new());
        by_slug.slug = "halftime-show-performer".to_string();
        assert!(is_tracked_event(&by_slug, &keywords()));

        assert!(!is_tracked_event(&event(3, "Election night", Vec::new()), &keywords()));
    }

    #[test]
    fn builds_sorted_groups_of_open_markets() {
        let groups = build_groups(
            vec![
                event(
                    10,
                    "Super Bowl MVP",
                    vec![
                        raw_market("a", r#"["0.10","0.90"]"#, true, false),
                        raw_market("b", r#"["0.55","0.45"]"#, true, false),
                        raw_market("c", r#"["0.90","0.10"]"#, true, true),
                        raw_market("d", r#"["0.30","0.70"]"#, false, false),
                    ],
                ),
                event(
                    11,
                    "Super Bowl coin toss",
                    vec![raw_market("e", r#"["0.5"]"#, false, false)],
                ),
                event(12, "Unrelated", vec![raw_market("f", r#"["0.5"]"#, true, false)]),
                event(10, "Super Bowl MVP", vec![raw_market("g", r#"["0.5"]"#, true, false)]),
            ],
            &keywords(),
        );

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].event_id, "10");
        let ids: Vec<&str> = groups[0].markets.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn deserializes_gamma_event_payload() {
        let mut payload = br#"[{"id":"903","title":"Super Bowl Champion","slug":"super-bowl","markets":[{"id":"5","question":"Chiefs?","outcomePrices":"[\"0.4\",\"0.6\"]","clobTokenIds":"[\"111\",\"222\"]","active":true,"closed":false,"groupItemTitle":"Chiefs"}]}]"#.to_vec();
        let events: Vec<GammaEventWire> =
            simd_json::serde::from_slice(&mut payload).expect("payload should decode");
        let groups = build_groups(events, &keywords());
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_binary());
        assert_eq!(groups[0].markets[0].display_label(), "Chiefs");
        assert_eq!(groups[0].markets[0].lead_instrument(), Some("111"));
    }
}
