// src/signals/reddit.rs
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{send_text, snippet, Mode};
use crate::config::ApiSettings;
use crate::error::ProviderError;
use crate::evidence::{Sentiment, SourceRecord, SourceType};

pub(crate) const NAME: &str = "reddit";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const SEARCH_URL: &str = "https://oauth.reddit.com/search";
const USER_AGENT: &str = concat!("polyseek/", env!("CARGO_PKG_VERSION"));
const LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: Option<String>,
    #[serde(default)]
    selftext: String,
    permalink: Option<String>,
    subreddit: Option<String>,
    created_utc: Option<f64>,
}

/// Application-only OAuth (client credentials), then site-wide search.
pub struct RedditProvider {
    credentials: Option<(String, String)>,
    mode: Mode,
}

impl RedditProvider {
    pub fn new(http: Client, apis: &ApiSettings) -> Self {
        let credentials = match (&apis.reddit_client_id, &apis.reddit_client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        };
        Self {
            credentials,
            mode: Mode::Http(http),
        }
    }

    pub fn from_fixture(body: impl Into<String>) -> Self {
        Self {
            credentials: None,
            mode: Mode::fixture(body),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.mode = self.mode.with_delay(delay);
        self
    }

    pub fn is_available(&self) -> bool {
        self.mode.is_fixture() || self.credentials.is_some()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SourceRecord>, ProviderError> {
        if let Some(body) = self.mode.fixture_body().await {
            return parse(body);
        }
        let (Mode::Http(http), Some((id, secret))) = (&self.mode, &self.credentials) else {
            return Err(ProviderError::Unavailable { provider: NAME });
        };

        let token_req = http
            .post(TOKEN_URL)
            .basic_auth(id, Some(secret))
            .header("User-Agent", USER_AGENT)
            .form(&[("grant_type", "client_credentials")]);
        let token: Token = serde_json::from_str(&send_text(token_req, NAME).await?)
            .map_err(|e| ProviderError::Parse {
                provider: NAME,
                message: format!("token: {e}"),
            })?;

        let limit = LIMIT.to_string();
        let req = http
            .get(SEARCH_URL)
            .bearer_auth(&token.access_token)
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("q", query),
                ("sort", "relevance"),
                ("t", "month"),
                ("limit", limit.as_str()),
            ]);
        let body = send_text(req, NAME).await?;
        parse(&body)
    }
}

fn parse(body: &str) -> Result<Vec<SourceRecord>, ProviderError> {
    let listing: Listing = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider: NAME,
        message: e.to_string(),
    })?;

    Ok(listing
        .data
        .children
        .into_iter()
        .take(LIMIT)
        .filter_map(|c| {
            let post = c.data;
            let title = post.title.filter(|t| !t.trim().is_empty())?;
            let text = if post.selftext.trim().is_empty() {
                snippet(&title)
            } else {
                snippet(&post.selftext)
            };
            let url = post
                .permalink
                .map(|p| format!("https://www.reddit.com{p}"))
                .unwrap_or_default();
            let ts = post
                .created_utc
                .and_then(|s| Utc.timestamp_opt(s as i64, 0).single());
            let origin = post
                .subreddit
                .map(|s| format!("r/{s}"))
                .unwrap_or_else(|| NAME.to_string());
            Some(
                SourceRecord::new(SourceType::Sns, title, url)
                    .sentiment(Sentiment::from_signal_text(&text))
                    .text(text)
                    .timestamp(ts)
                    .origin(origin),
            )
        })
        .collect())
}
