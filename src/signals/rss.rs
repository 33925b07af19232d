// src/signals/rss.rs
//! Keyless last-resort provider: Google News search feed plus a couple of general
//! feeds filtered by query keywords.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use quick_xml::de::from_str;
use reqwest::Client;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tracing::debug;

use super::{send_text, snippet, Mode};
use crate::error::ProviderError;
use crate::evidence::{Sentiment, SourceRecord, SourceType};

pub(crate) const NAME: &str = "rss";
const SEARCH_FEED: &str = "https://news.google.com/rss/search";
const SEARCH_FEED_TITLE: &str = "Google News RSS";
const GENERAL_FEEDS: [&str; 2] = [
    "https://feeds.bbci.co.uk/news/rss.xml",
    "https://feeds.npr.org/1001/rss.xml",
];
const PER_GENERAL_FEED: usize = 3;
/// Query words shorter than this are ignored when filtering general feeds.
const MIN_KEYWORD_CHARS: usize = 4;

#[derive(Debug, Deserialize)]
struct Rss {
    #[serde(default)]
    channel: Channel,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

pub struct RssFallbackProvider {
    max_results: usize,
    mode: Mode,
}

impl RssFallbackProvider {
    pub fn new(http: Client, max_results: usize) -> Self {
        Self {
            max_results: max_results.max(1),
            mode: Mode::Http(http),
        }
    }

    /// The fixture stands in for the search feed; general feeds are skipped.
    pub fn from_fixture(body: impl Into<String>) -> Self {
        Self {
            max_results: 10,
            mode: Mode::fixture(body),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.mode = self.mode.with_delay(delay);
        self
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SourceRecord>, ProviderError> {
        if let Some(body) = self.mode.fixture_body().await {
            let records = parse_feed(body, SEARCH_FEED_TITLE, self.max_results)?;
            return Ok(self.finish(records));
        }
        let Mode::Http(http) = &self.mode else {
            return Err(ProviderError::Unavailable { provider: NAME });
        };

        let search = async {
            let req = http.get(SEARCH_FEED).query(&[
                ("q", query),
                ("hl", "en"),
                ("gl", "US"),
                ("ceid", "US:en"),
            ]);
            let body = send_text(req.header("User-Agent", "Mozilla/5.0"), NAME).await?;
            parse_feed(&body, SEARCH_FEED_TITLE, self.max_results)
        };
        let general = join_all(GENERAL_FEEDS.iter().map(|url| async move {
            let req = http.get(*url).header("User-Agent", "Mozilla/5.0");
            let body = send_text(req, NAME).await?;
            let items = parse_feed(&body, "RSS Feed", self.max_results)?;
            Ok::<_, ProviderError>(filter_by_keywords(items, query))
        }));
        let (search, general) = tokio::join!(search, general);

        let mut first_err = None;
        let mut records = Vec::new();
        for batch in std::iter::once(search).chain(general) {
            match batch {
                Ok(r) => records.extend(r),
                Err(e) => {
                    debug!(target: "signals", error = %e, "rss feed skipped");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) if records.is_empty() => Err(e),
            _ => Ok(self.finish(records)),
        }
    }

    /// Drop URL-less and repeated links, cap at twice the per-provider limit.
    fn finish(&self, records: Vec<SourceRecord>) -> Vec<SourceRecord> {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
            .take(self.max_results * 2)
            .collect()
    }
}

fn parse_feed(body: &str, default_title: &str, limit: usize) -> Result<Vec<SourceRecord>, ProviderError> {
    let xml = scrub_html_entities_for_xml(body);
    let rss: Rss = from_str(&xml).map_err(|e| ProviderError::Parse {
        provider: NAME,
        message: e.to_string(),
    })?;
    let feed_title = rss
        .channel
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| default_title.to_string());

    Ok(rss
        .channel
        .item
        .into_iter()
        .take(limit)
        .map(|it| {
            let title = it.title.unwrap_or_else(|| "Untitled".to_string());
            let text = snippet(
                it.description
                    .as_deref()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or(&title),
            );
            SourceRecord::new(SourceType::News, title, it.link.unwrap_or_default().trim())
                .sentiment(Sentiment::from_signal_text(&text))
                .text(text)
                .timestamp(it.pub_date.as_deref().and_then(parse_pub_date))
                .origin(feed_title.clone())
        })
        .collect())
}

fn filter_by_keywords(items: Vec<SourceRecord>, query: &str) -> Vec<SourceRecord> {
    let words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        return Vec::new();
    }
    items
        .into_iter()
        .filter(|r| {
            let hay = format!("{} {}", r.title, r.text).to_lowercase();
            words.iter().any(|w| hay.contains(w.as_str()))
        })
        .take(PER_GENERAL_FEED)
        .collect()
}

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .map(|dt| dt.unix_timestamp())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts.trim())
                .ok()
                .map(|dt| dt.timestamp())
        })?;
    Utc.timestamp_opt(unix, 0).single()
}

// quick-xml only knows the five XML entities.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
