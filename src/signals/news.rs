// src/signals/news.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{send_text, snippet, Mode};
use crate::config::ApiSettings;
use crate::error::ProviderError;
use crate::evidence::{Sentiment, SourceRecord, SourceType};

pub(crate) const NAME: &str = "newsapi";
const ENDPOINT: &str = "https://newsapi.org/v2/everything";
const PAGE_SIZE: usize = 5;

#[derive(Debug, Deserialize)]
struct Everything {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    source: Option<ArticleSource>,
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
    content: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    name: Option<String>,
}

/// newsapi.org `/v2/everything`.
pub struct NewsProvider {
    api_key: Option<String>,
    window_days: u32,
    mode: Mode,
}

impl NewsProvider {
    pub fn new(http: Client, apis: &ApiSettings) -> Self {
        Self {
            api_key: apis.news_api_key.clone(),
            window_days: apis.news_window_days,
            mode: Mode::Http(http),
        }
    }

    pub fn from_fixture(body: impl Into<String>) -> Self {
        Self {
            api_key: None,
            window_days: 0,
            mode: Mode::fixture(body),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.mode = self.mode.with_delay(delay);
        self
    }

    pub fn is_available(&self) -> bool {
        self.mode.is_fixture() || self.api_key.is_some()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SourceRecord>, ProviderError> {
        if let Some(body) = self.mode.fixture_body().await {
            return parse(body);
        }
        let (Mode::Http(http), Some(key)) = (&self.mode, &self.api_key) else {
            return Err(ProviderError::Unavailable { provider: NAME });
        };

        let mut params = vec![
            ("q", query.to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
            ("language", "en".to_string()),
            ("sortBy", "publishedAt".to_string()),
        ];
        if self.window_days > 0 {
            let from = Utc::now() - ChronoDuration::days(i64::from(self.window_days));
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        let req = http.get(ENDPOINT).query(&params).header("X-Api-Key", key);
        let body = send_text(req, NAME).await?;
        parse(&body)
    }
}

fn parse(body: &str) -> Result<Vec<SourceRecord>, ProviderError> {
    let data: Everything = serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider: NAME,
        message: e.to_string(),
    })?;

    Ok(data
        .articles
        .into_iter()
        .map(|a| {
            let text = snippet(
                a.description
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .or(a.content.as_deref())
                    .unwrap_or_default(),
            );
            let origin = a
                .source
                .and_then(|s| s.name)
                .unwrap_or_else(|| NAME.to_string());
            let ts = a
                .published_at
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|d| d.with_timezone(&Utc));
            SourceRecord::new(
                SourceType::News,
                a.title.unwrap_or_else(|| "Untitled".to_string()),
                a.url.unwrap_or_default(),
            )
            .sentiment(Sentiment::from_signal_text(&text))
            .text(text)
            .timestamp(ts)
            .origin(origin)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiSettings;

    #[test]
    fn unavailable_without_key() {
        let p = NewsProvider::new(Client::new(), &ApiSettings::default());
        assert!(!p.is_available());
    }

    #[tokio::test]
    async fn parses_articles() {
        let body = r#"{"status":"ok","articles":[
            {"source":{"name":"Reuters"},"title":"Fed set to approve cut","url":"https://r/1",
             "description":"<b>Officials</b> signal a cut","publishedAt":"2026-10-01T12:00:00Z"},
            {"source":{},"title":null,"url":null,"description":"","content":"Markets fall"}
        ]}"#;
        let recs = NewsProvider::from_fixture(body).search("fed").await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].origin.as_deref(), Some("Reuters"));
        assert_eq!(recs[0].text, "Officials signal a cut");
        assert!(recs[0].timestamp.is_some());
        assert_eq!(recs[1].title, "Untitled");
        assert_eq!(recs[1].sentiment, Sentiment::Con);
        assert_eq!(recs[1].origin.as_deref(), Some("newsapi"));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_parse_error() {
        let err = NewsProvider::from_fixture("not json")
            .search("q")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
    }
}
