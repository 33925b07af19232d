// src/market/mod.rs
//! Context collection: platform detection, official market metadata and a best-effort
//! scrape of the market page (resolution rules + comments).

pub mod kalshi;
pub mod polymarket;
pub mod scrape;

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ApiSettings, ScrapeSettings, Settings};
use crate::error::MarketFetchError;
use crate::evidence::{Sentiment, SourceRecord, SourceType};
use crate::market::scrape::{Comment, PageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketPlatform {
    Polymarket,
    Kalshi,
}

impl MarketPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polymarket => "polymarket",
            Self::Kalshi => "kalshi",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Polymarket => "Polymarket",
            Self::Kalshi => "Kalshi",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketPrices {
    pub yes: Option<f64>,
    pub no: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub market_id: String,
    pub title: String,
    pub category: Option<String>,
    pub rules: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub liquidity: Option<f64>,
    pub volume_24h: Option<f64>,
    pub platform: MarketPlatform,
    pub url: String,
    pub prices: MarketPrices,
}

/// Identify the platform from the URL host. Unknown hosts are fatal.
pub fn detect_platform(url: &Url) -> Result<MarketPlatform, MarketFetchError> {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host.contains("polymarket") {
        Ok(MarketPlatform::Polymarket)
    } else if host.contains("kalshi") {
        Ok(MarketPlatform::Kalshi)
    } else {
        Err(MarketFetchError::UnsupportedHost(host))
    }
}

/// Last non-empty path segment (event slug / market ticker).
pub(crate) fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

pub struct ContextCollector {
    http: Client,
    apis: ApiSettings,
    scrape: ScrapeSettings,
    market_timeout: Duration,
    offline: bool,
}

impl ContextCollector {
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            http,
            apis: settings.apis.clone(),
            scrape: settings.scrape.clone(),
            market_timeout: settings.timeouts.market(),
            offline: settings.app.offline_mode,
        }
    }

    /// Metadata (fatal on failure) and page comments (best-effort), fetched concurrently.
    /// The market itself is the first returned record.
    pub async fn fetch(
        &self,
        url: &Url,
    ) -> Result<(MarketMetadata, Vec<SourceRecord>), MarketFetchError> {
        let platform = detect_platform(url)?;
        if self.offline {
            debug!(target: "market", platform = platform.as_str(), "offline mode: stub context");
            let meta = offline_metadata(url, platform);
            let records = context_records(&meta, &offline_page().comments);
            return Ok((meta, records));
        }

        let meta_fut = self.fetch_metadata(platform, url);
        let page_fut = async {
            Ok::<_, MarketFetchError>(match self.scrape_page(url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(target: "market", error = %e, "page scrape failed; continuing without comments");
                    PageContext::default()
                }
            })
        };
        // A metadata failure drops the in-flight scrape.
        let (mut meta, page) = tokio::try_join!(meta_fut, page_fut)?;

        if meta.rules.is_none() {
            meta.rules = page.resolution_rules.clone();
        }
        info!(
            target: "market",
            platform = platform.as_str(),
            market_id = %meta.market_id,
            comments = page.comments.len(),
            "market context collected"
        );
        let records = context_records(&meta, &page.comments);
        Ok((meta, records))
    }

    async fn fetch_metadata(
        &self,
        platform: MarketPlatform,
        url: &Url,
    ) -> Result<MarketMetadata, MarketFetchError> {
        match platform {
            MarketPlatform::Polymarket => {
                polymarket::fetch(&self.http, &self.apis, url, self.market_timeout).await
            }
            MarketPlatform::Kalshi => {
                kalshi::fetch(&self.http, &self.apis, url, self.market_timeout).await
            }
        }
    }

    async fn scrape_page(&self, url: &Url) -> anyhow::Result<PageContext> {
        let resp = self
            .http
            .get(url.as_str())
            .timeout(self.scrape.timeout())
            .send()
            .await?
            .error_for_status()?;
        let html = resp.text().await?;
        Ok(scrape::parse_page(
            &html,
            self.scrape.max_comments,
            self.scrape.max_comment_chars,
        ))
    }
}

/// GET + status check + JSON decode, with the platform's error vocabulary.
pub(crate) async fn get_json(
    req: reqwest::RequestBuilder,
    platform: MarketPlatform,
    id: &str,
    timeout: Duration,
) -> Result<Value, MarketFetchError> {
    let label = platform.label();
    let resp = req.timeout(timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            MarketFetchError::Timeout {
                platform: label,
                after: timeout,
            }
        } else {
            MarketFetchError::Http {
                platform: label,
                message: e.to_string(),
            }
        }
    })?;
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(MarketFetchError::NotFound {
            platform: label,
            id: id.to_string(),
        });
    }
    if !status.is_success() {
        return Err(MarketFetchError::Http {
            platform: label,
            message: format!("HTTP {status}"),
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| MarketFetchError::Decode {
            platform: label,
            message: e.to_string(),
        })
}

/// Number or numeric string.
pub(crate) fn to_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty string field.
pub(crate) fn str_of(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_datetime(v: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = str_of(v)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The market as evidence, followed by one record per scraped comment.
fn context_records(meta: &MarketMetadata, comments: &[Comment]) -> Vec<SourceRecord> {
    let mut out = Vec::with_capacity(comments.len() + 1);
    out.push(market_record(meta));
    for (i, c) in comments.iter().enumerate() {
        let title = match &c.author {
            Some(a) => format!("Comment by {a}"),
            None => format!("Comment #{}", i + 1),
        };
        let mut rec = SourceRecord::new(
            SourceType::Comment,
            title,
            format!("{}#comment-{}", meta.url, i + 1),
        )
        .text(c.body.clone())
        .sentiment(c.sentiment);
        if let Some(a) = &c.author {
            rec = rec.origin(a.clone());
        }
        out.push(rec);
    }
    out
}

pub fn market_record(meta: &MarketMetadata) -> SourceRecord {
    let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |x| format!("{x}"));
    let mut text = format!(
        "Prices: YES={} NO={}. 24h volume: {}. Liquidity: {}. Deadline (UTC): {}.",
        fmt_opt(meta.prices.yes),
        fmt_opt(meta.prices.no),
        fmt_opt(meta.volume_24h),
        fmt_opt(meta.liquidity),
        meta.deadline
            .map_or_else(|| "n/a".to_string(), |d| d.to_rfc3339()),
    );
    if let Some(rules) = &meta.rules {
        text.push_str(" Resolution rules: ");
        text.push_str(rules);
    }
    SourceRecord::new(SourceType::Market, meta.title.clone(), meta.url.clone())
        .text(text)
        .sentiment(Sentiment::Neutral)
        .origin(meta.platform.as_str())
}

fn offline_metadata(url: &Url, platform: MarketPlatform) -> MarketMetadata {
    MarketMetadata {
        market_id: format!("offline-{}", platform.as_str()),
        title: format!("Offline {} market", platform.label()),
        category: Some("offline".to_string()),
        rules: Some("Offline mode is enabled; this is stubbed data.".to_string()),
        deadline: Some(Utc::now() + chrono::Duration::days(7)),
        liquidity: Some(10_000.0),
        volume_24h: Some(5_000.0),
        platform,
        url: url.to_string(),
        prices: MarketPrices {
            yes: Some(0.5),
            no: Some(0.5),
        },
    }
}

fn offline_page() -> PageContext {
    PageContext {
        resolution_rules: Some("Offline mode: resolution text unavailable.".to_string()),
        comments: vec![Comment {
            author: Some("user_offline".to_string()),
            body: "This is offline mode. Replace with real comments when online.".to_string(),
            sentiment: Sentiment::Neutral,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn detects_platform_from_host() {
        assert_eq!(
            detect_platform(&url("https://polymarket.com/event/x")).unwrap(),
            MarketPlatform::Polymarket
        );
        assert_eq!(
            detect_platform(&url("https://kalshi.com/markets/kxbtc")).unwrap(),
            MarketPlatform::Kalshi
        );
        let err = detect_platform(&url("https://example.com/market/x")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_market");
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn last_segment_skips_trailing_slash() {
        assert_eq!(
            last_segment(&url("https://polymarket.com/event/my-slug/")).as_deref(),
            Some("my-slug")
        );
        assert_eq!(last_segment(&url("https://polymarket.com/")), None);
    }

    #[test]
    fn lenient_numbers() {
        let v = serde_json::json!({"a": "0.65", "b": 12, "c": "n/a"});
        assert_eq!(to_f64(v.get("a")), Some(0.65));
        assert_eq!(to_f64(v.get("b")), Some(12.0));
        assert_eq!(to_f64(v.get("c")), None);
        assert_eq!(to_f64(v.get("missing")), None);
    }

    #[test]
    fn market_record_comes_first_and_comment_urls_are_unique() {
        let meta = offline_metadata(
            &url("https://polymarket.com/event/x"),
            MarketPlatform::Polymarket,
        );
        let comments = vec![
            Comment {
                author: None,
                body: "first comment body".into(),
                sentiment: Sentiment::Neutral,
            },
            Comment {
                author: Some("user_0042".into()),
                body: "second comment body".into(),
                sentiment: Sentiment::Pro,
            },
        ];
        let recs = context_records(&meta, &comments);
        assert_eq!(recs[0].kind, SourceType::Market);
        assert!(recs[0].text.contains("YES=0.5"));
        assert_eq!(recs[1].url, "https://polymarket.com/event/x#comment-1");
        assert_eq!(recs[2].title, "Comment by user_0042");
        assert_ne!(recs[1].url, recs[2].url);
    }

    #[tokio::test]
    async fn offline_collector_still_rejects_unknown_hosts() {
        let mut settings = Settings::default();
        settings.app.offline_mode = true;
        let collector = ContextCollector::new(Client::new(), &settings);

        let (meta, records) = collector
            .fetch(&url("https://kalshi.com/markets/abc"))
            .await
            .unwrap();
        assert_eq!(meta.platform, MarketPlatform::Kalshi);
        assert_eq!(records.len(), 2);

        assert!(collector
            .fetch(&url("https://example.org/m/1"))
            .await
            .is_err());
    }
}
