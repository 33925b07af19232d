// src/market/polymarket.rs
//! Gamma API: `/events?slug=` first (event with nested markets), `/markets?slug=` as fallback.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    get_json, last_segment, parse_datetime, str_of, to_f64, MarketMetadata, MarketPlatform,
    MarketPrices,
};
use crate::config::ApiSettings;
use crate::error::MarketFetchError;

const PLATFORM: MarketPlatform = MarketPlatform::Polymarket;

pub(crate) async fn fetch(
    http: &Client,
    apis: &ApiSettings,
    url: &Url,
    timeout: Duration,
) -> Result<MarketMetadata, MarketFetchError> {
    let slug = last_segment(url).ok_or_else(|| MarketFetchError::MissingIdentifier {
        platform: "Polymarket",
        url: url.to_string(),
    })?;
    let base = apis.polymarket_base.trim_end_matches('/');

    let events = get_json(
        http.get(format!("{base}/events")).query(&[("slug", &slug)]),
        PLATFORM,
        &slug,
        timeout,
    )
    .await?;
    if let Some(meta) = parse_events(&events, &slug, url.as_str()) {
        return Ok(meta);
    }

    debug!(target: "market", %slug, "no event match; falling back to /markets");
    let markets = get_json(
        http.get(format!("{base}/markets")).query(&[("slug", &slug)]),
        PLATFORM,
        &slug,
        timeout,
    )
    .await?;
    parse_markets(&markets, &slug, url.as_str())
}

/// First event's first active market (or its first market). `None` if the payload
/// holds no event with markets.
pub fn parse_events(payload: &Value, slug: &str, url: &str) -> Option<MarketMetadata> {
    let event = payload.as_array()?.first()?;
    let markets = event.get("markets")?.as_array()?;
    let market = markets
        .iter()
        .find(|m| m.get("active").and_then(Value::as_bool).unwrap_or(false))
        .or_else(|| markets.first())?;

    Some(MarketMetadata {
        market_id: str_of(market.get("id"))
            .or_else(|| str_of(event.get("id")))
            .unwrap_or_else(|| slug.to_string()),
        title: str_of(event.get("title"))
            .or_else(|| str_of(market.get("question")))
            .unwrap_or_else(|| slug.to_string()),
        category: str_of(event.get("category")),
        rules: str_of(event.get("description"))
            .or_else(|| str_of(market.get("description")))
            .or_else(|| str_of(market.get("resolutionSource"))),
        deadline: parse_datetime(event.get("endDate")).or_else(|| parse_datetime(market.get("endDate"))),
        liquidity: to_f64(event.get("liquidity")).or_else(|| to_f64(market.get("liquidity"))),
        volume_24h: to_f64(event.get("volume24hr")).or_else(|| to_f64(market.get("volume24hr"))),
        platform: PLATFORM,
        url: url.to_string(),
        prices: outcome_prices(market),
    })
}

/// `/markets` returns either a bare list or `{ "markets": [...] }`.
pub fn parse_markets(payload: &Value, slug: &str, url: &str) -> Result<MarketMetadata, MarketFetchError> {
    let list = match payload {
        Value::Array(items) => Some(items),
        other => other.get("markets").and_then(Value::as_array),
    };
    let market = list
        .and_then(|l| l.first())
        .ok_or_else(|| MarketFetchError::NotFound {
            platform: "Polymarket",
            id: slug.to_string(),
        })?;

    let mut prices = outcome_prices(market);
    if prices.yes.is_none() {
        prices.yes = to_f64(market.get("yesPrice")).or_else(|| to_f64(market.get("price")));
    }
    if prices.no.is_none() {
        prices.no = to_f64(market.get("noPrice"));
    }

    Ok(MarketMetadata {
        market_id: str_of(market.get("market_id"))
            .or_else(|| str_of(market.get("id")))
            .unwrap_or_else(|| slug.to_string()),
        title: str_of(market.get("question"))
            .or_else(|| str_of(market.get("title")))
            .unwrap_or_else(|| slug.to_string()),
        category: str_of(market.get("category")),
        rules: str_of(market.get("resolution_source"))
            .or_else(|| str_of(market.get("resolution_criteria")))
            .or_else(|| str_of(market.get("description"))),
        deadline: parse_datetime(market.get("end_date"))
            .or_else(|| parse_datetime(market.get("endDate")))
            .or_else(|| parse_datetime(market.get("close_time"))),
        liquidity: to_f64(market.get("liquidity_in_usd")).or_else(|| to_f64(market.get("liquidity"))),
        volume_24h: to_f64(market.get("volume24hr")),
        platform: PLATFORM,
        url: url.to_string(),
        prices,
    })
}

/// `outcomes` / `outcomePrices` arrive either as arrays or as JSON-encoded strings.
fn outcome_prices(market: &Value) -> MarketPrices {
    let outcomes = json_list(market.get("outcomes"));
    let prices = json_list(market.get("outcomePrices"));
    let mut out = MarketPrices::default();
    for (outcome, price) in outcomes.iter().zip(prices.iter()) {
        let Some(name) = outcome.as_str() else { continue };
        let price = to_f64(Some(price));
        if name.eq_ignore_ascii_case("yes") {
            out.yes = price;
        } else if name.eq_ignore_ascii_case("no") {
            out.no = price;
        }
    }
    out
}

fn json_list(v: Option<&Value>) -> Vec<Value> {
    match v {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "https://polymarket.com/event/fed-decision";

    #[test]
    fn event_payload_prefers_active_market_and_decodes_string_prices() {
        let payload = json!([{
            "id": "ev1",
            "title": "Fed decision in December?",
            "category": "Economics",
            "description": "Resolves YES if the Fed cuts.",
            "endDate": "2026-12-10T00:00:00Z",
            "liquidity": "125000.5",
            "volume24hr": 4200,
            "markets": [
                {"id": "m0", "active": false, "outcomes": "[\"Yes\",\"No\"]", "outcomePrices": "[\"0.1\",\"0.9\"]"},
                {"id": "m1", "active": true, "outcomes": "[\"Yes\",\"No\"]", "outcomePrices": "[\"0.62\",\"0.38\"]"}
            ]
        }]);
        let m = parse_events(&payload, "fed-decision", URL).unwrap();
        assert_eq!(m.market_id, "m1");
        assert_eq!(m.title, "Fed decision in December?");
        assert_eq!(m.prices.yes, Some(0.62));
        assert_eq!(m.prices.no, Some(0.38));
        assert_eq!(m.liquidity, Some(125000.5));
        assert_eq!(m.volume_24h, Some(4200.0));
        assert!(m.deadline.is_some());
        assert_eq!(m.rules.as_deref(), Some("Resolves YES if the Fed cuts."));
    }

    #[test]
    fn empty_event_list_defers_to_markets_endpoint() {
        assert!(parse_events(&json!([]), "x", URL).is_none());
        assert!(parse_events(&json!([{"id": "e", "markets": []}]), "x", URL).is_none());
    }

    #[test]
    fn markets_payload_accepts_both_shapes() {
        let bare = json!([{"id": 7, "question": "Q?", "yesPrice": "0.3", "noPrice": 0.7}]);
        let m = parse_markets(&bare, "q", URL).unwrap();
        assert_eq!(m.market_id, "7");
        assert_eq!(m.prices.yes, Some(0.3));

        let wrapped = json!({"markets": [{"title": "T", "price": 0.44}]});
        let m = parse_markets(&wrapped, "t", URL).unwrap();
        assert_eq!(m.title, "T");
        assert_eq!(m.market_id, "t");
        assert_eq!(m.prices.yes, Some(0.44));
    }

    #[test]
    fn empty_markets_payload_is_not_found() {
        let err = parse_markets(&json!([]), "gone", URL).unwrap_err();
        assert_eq!(err.kind(), "market_not_found");
        assert!(err.to_string().contains("gone"));
    }
}
