// src/signals/x.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{send_text, snippet, Mode};
use crate::config::ApiSettings;
use crate::error::ProviderError;
use crate::evidence::text::truncate_chars;
use crate::evidence::{Sentiment, SourceRecord, SourceType};

pub(crate) const NAME: &str = "x";
const ENDPOINT: &str = "https://api.twitter.com/2/tweets/search/recent";
/// API minimum is 10.
const MAX_RESULTS: usize = 10;
const QUERY_MAX_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct Search {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Includes,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

/// X (Twitter) API v2 recent search with a bearer token.
pub struct XProvider {
    bearer_token: Option<String>,
    mode: Mode,
}

impl XProvider {
    pub fn new(http: Client, apis: &ApiSettings) -> Self {
        Self {
            bearer_token: apis.x_bearer_token.clone(),
            mode: Mode::Http(http),
        }
    }

    pub fn from_fixture(body: impl Into<String>) -> Self {
        Self {
            bearer_token: None,
            mode: Mode::fixture(body),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.mode = self.mode.with_delay(delay);
        self
    }

    pub fn is_available(&self) -> bool {
        self.mode.is_fixture() || self.bearer_token.is_some()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SourceRecord>, ProviderError> {
        if let Some(body) = self.mode.fixture_body().await {
            return parse(body);
        }
        let (Mode::Http(http), Some(token)) = (&self.mode, &self.bearer_token) else {
            return Err(ProviderError::Unavailable { provider: NAME });
        };

        let cleaned = truncate_chars(query.replace('?', "").replace("Will", "").trim(), QUERY_MAX_CHARS);
        let max = MAX_RESULTS.to_string();
        let req = http.get(ENDPOINT).bearer_auth(token).query(&[
            ("query", cleaned.as_str()),
            ("max_results", max.as_str()),
            ("tweet.fields", "created_at,public_metrics,lang"),
            ("expansions", "author_id"),
            ("user.fields", "username,verified"),
        ]);
        let body = send_text(req, NAME).await?;
        parse(&body)
    }
}

fn parse(body: &str) -> Result<Vec<SourceRecord>, ProviderError> {
    let search: Search = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider: NAME,
        message: e.to_string(),
    })?;
    let users: HashMap<&str, &str> = search
        .includes
        .users
        .iter()
        .map(|u| (u.id.as_str(), u.username.as_str()))
        .collect();

    Ok(search
        .data
        .iter()
        .map(|t| {
            let username = t
                .author_id
                .as_deref()
                .and_then(|a| users.get(a).copied())
                .unwrap_or("unknown");
            let text = snippet(&t.text);
            let ts = t
                .created_at
                .as_deref()
                .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                .map(|d| d.with_timezone(&Utc));
            SourceRecord::new(
                SourceType::Sns,
                format!("Tweet by @{username}"),
                format!("https://twitter.com/{username}/status/{}", t.id),
            )
            .sentiment(Sentiment::from_signal_text(&text))
            .text(text)
            .timestamp(ts)
            .origin(format!("@{username}"))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joins_authors_from_includes() {
        let body = r#"{
            "data":[
                {"id":"1","text":"Rates will fall, calling it now","author_id":"u1","created_at":"2026-10-02T08:00:00.000Z"},
                {"id":"2","text":"no idea","author_id":"u9"}
            ],
            "includes":{"users":[{"id":"u1","username":"macro_pat"}]}
        }"#;
        let recs = XProvider::from_fixture(body).search("fed").await.unwrap();
        assert_eq!(recs[0].title, "Tweet by @macro_pat");
        assert_eq!(recs[0].url, "https://twitter.com/macro_pat/status/1");
        assert_eq!(recs[0].sentiment, Sentiment::Con);
        assert!(recs[0].timestamp.is_some());
        assert_eq!(recs[1].origin.as_deref(), Some("@unknown"));
    }

    #[tokio::test]
    async fn empty_result_has_no_data_key() {
        let recs = XProvider::from_fixture(r#"{"meta":{"result_count":0}}"#)
            .search("q")
            .await
            .unwrap();
        assert!(recs.is_empty());
    }
}
