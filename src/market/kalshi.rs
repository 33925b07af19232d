// src/market/kalshi.rs
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{
    get_json, last_segment, parse_datetime, str_of, to_f64, MarketMetadata, MarketPlatform,
    MarketPrices,
};
use crate::config::ApiSettings;
use crate::error::MarketFetchError;

const PLATFORM: MarketPlatform = MarketPlatform::Kalshi;

pub(crate) async fn fetch(
    http: &Client,
    apis: &ApiSettings,
    url: &Url,
    timeout: Duration,
) -> Result<MarketMetadata, MarketFetchError> {
    let ticker = last_segment(url)
        .map(|s| s.to_ascii_uppercase())
        .ok_or_else(|| MarketFetchError::MissingIdentifier {
            platform: "Kalshi",
            url: url.to_string(),
        })?;
    let base = apis.kalshi_base.trim_end_matches('/');

    let mut req = http
        .get(format!("{base}/trade-api/v2/markets/{ticker}"))
        .header("accept", "application/json");
    // Credentials are only sent as a pair.
    if let (Some(key), Some(secret)) = (&apis.kalshi_api_key, &apis.kalshi_api_secret) {
        req = req
            .header("kalshi-access-key", key)
            .header("kalshi-secret-key", secret);
    }

    let payload = get_json(req, PLATFORM, &ticker, timeout).await?;
    parse_market(&payload, &ticker, url.as_str())
}

/// `{ "market": { ... } }`. Prices quoted in cents are scaled to [0, 1]. A payload
/// without a `market` object does not identify a market.
pub fn parse_market(
    payload: &Value,
    ticker: &str,
    url: &str,
) -> Result<MarketMetadata, MarketFetchError> {
    let market = payload
        .get("market")
        .filter(|m| m.is_object())
        .ok_or_else(|| MarketFetchError::NotFound {
            platform: "Kalshi",
            id: ticker.to_string(),
        })?;

    let yes = to_f64(market.get("yes_price"))
        .or_else(|| to_f64(market.get("last_price")))
        .or_else(|| to_f64(market.get("yes_bid")))
        .map(cents_to_unit);
    let no = to_f64(market.get("no_price"))
        .or_else(|| to_f64(market.get("no_bid")))
        .map(cents_to_unit)
        .or_else(|| yes.map(|y| ((1.0 - y) * 100.0).round() / 100.0));

    Ok(MarketMetadata {
        market_id: str_of(market.get("id"))
            .or_else(|| str_of(market.get("ticker")))
            .unwrap_or_else(|| ticker.to_string()),
        title: str_of(market.get("title")).unwrap_or_else(|| ticker.to_string()),
        category: str_of(market.get("category")).or_else(|| str_of(market.get("event_ticker"))),
        rules: str_of(market.get("rules"))
            .or_else(|| str_of(market.get("rules_primary"))),
        deadline: parse_datetime(market.get("close_time")),
        liquidity: to_f64(market.get("liquidity")),
        volume_24h: to_f64(market.get("day_volume")).or_else(|| to_f64(market.get("volume_24h"))),
        platform: PLATFORM,
        url: url.to_string(),
        prices: MarketPrices { yes, no },
    })
}

fn cents_to_unit(v: f64) -> f64 {
    if v > 1.0 {
        v / 100.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cent_prices_and_rules() {
        let payload = json!({"market": {
            "ticker": "KXFED-25DEC",
            "title": "Fed cuts in December?",
            "event_ticker": "KXFED",
            "rules_primary": "If the Fed cuts, resolves Yes.",
            "close_time": "2026-12-10T19:00:00Z",
            "yes_bid": 41,
            "liquidity": 90210,
            "volume_24h": 1500
        }});
        let m = parse_market(&payload, "KXFED-25DEC", "https://kalshi.com/markets/kxfed-25dec")
            .unwrap();
        assert_eq!(m.market_id, "KXFED-25DEC");
        assert_eq!(m.category.as_deref(), Some("KXFED"));
        assert_eq!(m.prices.yes, Some(0.41));
        assert_eq!(m.prices.no, Some(0.59));
        assert_eq!(m.volume_24h, Some(1500.0));
        assert!(m.rules.unwrap().starts_with("If the Fed"));
    }

    #[test]
    fn payload_without_market_object_is_not_found() {
        let url = "https://kalshi.com/markets/nope";
        for payload in [
            json!({"error": {"code": "not_found"}}),
            json!({}),
            json!({"market": null}),
            json!({"market": "NOPE"}),
        ] {
            let err = parse_market(&payload, "NOPE", url).unwrap_err();
            assert_eq!(err.kind(), "market_not_found");
            assert!(err.to_string().contains("NOPE"));
        }
    }
}
