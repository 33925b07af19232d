// src/signals/mod.rs
//! External signal fan-out (news / social / RSS) normalized into `SourceRecord`s.

pub mod news;
pub mod reddit;
pub mod rss;
pub mod x;

use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::counter;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::ProviderError;
use crate::evidence::text::{normalize_text, truncate_chars};
use crate::evidence::{Sentiment, SourceRecord, SourceType};

pub use news::NewsProvider;
pub use reddit::RedditProvider;
pub use rss::RssFallbackProvider;
pub use x::XProvider;

/// Max characters kept from any provider snippet.
pub const SNIPPET_CHARS: usize = 280;
const QUERY_MAX_CHARS: usize = 100;

/// Where a provider gets its payload from. Fixture payloads go through the same parser.
#[derive(Debug, Clone)]
pub(crate) enum Mode {
    Fixture { body: String, delay: Duration },
    Http(Client),
}

impl Mode {
    pub(crate) fn fixture(body: impl Into<String>) -> Self {
        Self::Fixture {
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        match self {
            Self::Fixture { body, .. } => Self::Fixture { body, delay },
            http => http,
        }
    }

    pub(crate) fn is_fixture(&self) -> bool {
        matches!(self, Self::Fixture { .. })
    }

    /// Canned body for fixture mode (after its delay); `None` in HTTP mode.
    pub(crate) async fn fixture_body(&self) -> Option<&str> {
        match self {
            Self::Fixture { body, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Some(body)
            }
            Self::Http(_) => None,
        }
    }
}

/// Send, check status, read body.
pub(crate) async fn send_text(
    req: reqwest::RequestBuilder,
    provider: &'static str,
) -> Result<String, ProviderError> {
    let resp = req.send().await.map_err(|e| ProviderError::Http {
        provider,
        message: e.to_string(),
    })?;
    let status = resp.status();
    if !status.is_success() {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(target: "signals", provider, "authentication failed; check credentials");
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(target: "signals", provider, "rate limited");
        }
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
        });
    }
    resp.text().await.map_err(|e| ProviderError::Http {
        provider,
        message: e.to_string(),
    })
}

/// Normalized, length-bounded snippet text.
pub(crate) fn snippet(raw: &str) -> String {
    truncate_chars(&normalize_text(raw, usize::MAX), SNIPPET_CHARS)
}

/// Fixed set of provider kinds. Adding a source means adding a variant.
pub enum SignalProvider {
    News(NewsProvider),
    Reddit(RedditProvider),
    X(XProvider),
    Rss(RssFallbackProvider),
}

impl SignalProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::News(_) => news::NAME,
            Self::Reddit(_) => reddit::NAME,
            Self::X(_) => x::NAME,
            Self::Rss(_) => rss::NAME,
        }
    }

    /// Lower sorts first: News > Reddit > X > RSS.
    pub fn priority(&self) -> u8 {
        match self {
            Self::News(_) => 0,
            Self::Reddit(_) => 1,
            Self::X(_) => 2,
            Self::Rss(_) => 3,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::News(p) => p.is_available(),
            Self::Reddit(p) => p.is_available(),
            Self::X(p) => p.is_available(),
            Self::Rss(_) => true,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SourceRecord>, ProviderError> {
        match self {
            Self::News(p) => p.search(query).await,
            Self::Reddit(p) => p.search(query).await,
            Self::X(p) => p.search(query).await,
            Self::Rss(p) => p.search(query).await,
        }
    }
}

pub struct SignalAggregator {
    providers: Vec<SignalProvider>,
    fallback: SignalProvider,
    timeout: Duration,
    offline: bool,
}

impl SignalAggregator {
    /// Providers are kept in priority order regardless of the order given.
    pub fn new(
        mut providers: Vec<SignalProvider>,
        fallback: RssFallbackProvider,
        timeout: Duration,
    ) -> Self {
        providers.sort_by_key(SignalProvider::priority);
        Self {
            providers,
            fallback: SignalProvider::Rss(fallback),
            timeout,
            offline: false,
        }
    }

    pub fn from_settings(http: Client, settings: &Settings) -> Self {
        let apis = &settings.apis;
        let providers = vec![
            SignalProvider::News(NewsProvider::new(http.clone(), apis)),
            SignalProvider::Reddit(RedditProvider::new(http.clone(), apis)),
            SignalProvider::X(XProvider::new(http.clone(), apis)),
            SignalProvider::Rss(RssFallbackProvider::new(
                http.clone(),
                apis.max_results_per_provider,
            )),
        ];
        let fallback = RssFallbackProvider::new(http, apis.max_results_per_provider);
        let mut agg = Self::new(providers, fallback, settings.timeouts.provider());
        agg.offline = settings.app.offline_mode;
        agg
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Names of the providers that would run for the next `collect`.
    pub fn active_providers(&self) -> Vec<&'static str> {
        let active: Vec<&'static str> = self
            .providers
            .iter()
            .filter(|p| p.is_available())
            .map(SignalProvider::name)
            .collect();
        if active.is_empty() {
            vec![self.fallback.name()]
        } else {
            active
        }
    }

    /// Query every available provider concurrently. Failures and timeouts contribute
    /// nothing; output is concatenated in priority order.
    pub async fn collect(&self, query: &str) -> Vec<SourceRecord> {
        if self.offline {
            debug!(target: "signals", "offline mode: stub signal");
            return vec![offline_signal(query)];
        }

        let mut active: Vec<&SignalProvider> =
            self.providers.iter().filter(|p| p.is_available()).collect();
        if active.is_empty() {
            info!(target: "signals", "no signal providers available; using RSS fallback");
            active.push(&self.fallback);
        }

        let runs = active.iter().map(|p| self.run_one(p, query));
        let batches = join_all(runs).await;

        let out: Vec<SourceRecord> = batches.into_iter().flatten().collect();
        info!(target: "signals", records = out.len(), providers = active.len(), "signals collected");
        out
    }

    async fn run_one(&self, provider: &SignalProvider, query: &str) -> Vec<SourceRecord> {
        let name = provider.name();
        let t0 = Instant::now();
        match tokio::time::timeout(self.timeout, provider.search(query)).await {
            Ok(Ok(records)) => {
                debug!(
                    target: "signals",
                    provider = name,
                    records = records.len(),
                    ms = t0.elapsed().as_millis() as u64,
                    "provider ok"
                );
                records
            }
            Ok(Err(e)) => {
                warn!(target: "signals", error = %e, provider = name, "provider error");
                counter!("polyseek_provider_errors_total", "provider" => name).increment(1);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    target: "signals",
                    provider = name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "provider timed out"
                );
                counter!("polyseek_provider_errors_total", "provider" => name).increment(1);
                Vec::new()
            }
        }
    }
}

/// Search terms from a market title: no `?`, no leading "When will"/"Will", max 100 chars.
pub fn build_query(title: &str) -> String {
    let cleaned = title.replace('?', "");
    let mut rest = cleaned.trim();
    for prefix in ["when will ", "will "] {
        if rest.len() >= prefix.len()
            && rest.is_char_boundary(prefix.len())
            && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            rest = &rest[prefix.len()..];
            break;
        }
    }
    truncate_chars(rest.trim(), QUERY_MAX_CHARS).trim().to_string()
}

fn offline_signal(query: &str) -> SourceRecord {
    SourceRecord::new(
        SourceType::News,
        format!("Offline insight for {query}"),
        String::new(),
    )
    .text("Offline mode stub signal.")
    .sentiment(Sentiment::Neutral)
    .origin("offline-news")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_drops_question_marks_and_leading_will() {
        assert_eq!(
            build_query("Will the Fed cut rates in December?"),
            "the Fed cut rates in December"
        );
        assert_eq!(build_query("When will BTC hit $150k?"), "BTC hit $150k");
        assert_eq!(build_query("  Goodwill Games held in 2027?"), "Goodwill Games held in 2027");
        assert_eq!(build_query(&"x".repeat(150)).len(), 100);
    }

    #[test]
    fn providers_are_kept_in_priority_order() {
        let agg = SignalAggregator::new(
            vec![
                SignalProvider::Rss(RssFallbackProvider::from_fixture("<rss/>")),
                SignalProvider::X(XProvider::from_fixture("{}")),
                SignalProvider::News(NewsProvider::from_fixture("{}")),
            ],
            RssFallbackProvider::from_fixture("<rss/>"),
            Duration::from_secs(1),
        );
        assert_eq!(agg.active_providers(), vec!["newsapi", "x", "rss"]);
    }

    #[tokio::test]
    async fn offline_mode_returns_a_single_stub() {
        let agg = SignalAggregator::new(
            Vec::new(),
            RssFallbackProvider::from_fixture("<rss/>"),
            Duration::from_secs(1),
        )
        .offline(true);
        let out = agg.collect("fed").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].origin.as_deref(), Some("offline-news"));
    }
}
