// src/config/mod.rs
//! Process-wide settings, built once and passed down by reference.
//!
//! Precedence: built-in defaults < TOML file at `$POLYSEEK_CONFIG` < environment.

pub mod llm;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, str::FromStr, time::Duration};

use crate::evidence::DedupKey;
use crate::request::Depth;

pub use llm::LlmSettings;

pub const ENV_CONFIG_PATH: &str = "POLYSEEK_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub apis: ApiSettings,
    pub scrape: ScrapeSettings,
    pub llm: LlmSettings,
    pub evidence: EvidenceSettings,
    pub timeouts: TimeoutSettings,
    pub app: AppSettings,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub polymarket_base: String,
    pub kalshi_base: String,
    pub kalshi_api_key: Option<String>,
    pub kalshi_api_secret: Option<String>,
    pub news_api_key: Option<String>,
    pub news_window_days: u32,
    pub x_bearer_token: Option<String>,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    /// Max results requested from each provider.
    pub max_results_per_provider: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            polymarket_base: "https://gamma-api.polymarket.com".to_string(),
            kalshi_base: "https://trading-api.kalshi.com".to_string(),
            kalshi_api_key: None,
            kalshi_api_secret: None,
            news_api_key: None,
            news_window_days: 30,
            x_bearer_token: None,
            reddit_client_id: None,
            reddit_client_secret: None,
            max_results_per_provider: 10,
        }
    }
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("polymarket_base", &self.polymarket_base)
            .field("kalshi_base", &self.kalshi_base)
            .field("kalshi_credentials", &self.kalshi_api_key.is_some())
            .field("news_api_key", &self.news_api_key.is_some())
            .field("x_bearer_token", &self.x_bearer_token.is_some())
            .field("reddit_credentials", &self.reddit_client_id.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    pub timeout_secs: f64,
    pub max_comments: usize,
    pub max_comment_chars: usize,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 8.0,
            max_comments: 20,
            max_comment_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceSettings {
    pub budget_quick: usize,
    pub budget_deep: usize,
    pub dedup_key: DedupKey,
    /// Per-record text excerpt length inside prompts.
    pub excerpt_chars: usize,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            budget_quick: 20,
            budget_deep: 40,
            dedup_key: DedupKey::UrlThenTitle,
            excerpt_chars: 280,
        }
    }
}

impl EvidenceSettings {
    pub fn budget_for(&self, depth: Depth) -> usize {
        match depth {
            Depth::Quick => self.budget_quick,
            Depth::Deep => self.budget_deep,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub market_secs: f64,
    pub provider_secs: f64,
    pub llm_secs: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            market_secs: 10.0,
            provider_secs: 15.0,
            llm_secs: 90.0,
        }
    }
}

impl TimeoutSettings {
    pub fn market(&self) -> Duration {
        secs(self.market_secs)
    }
    pub fn provider(&self) -> Duration {
        secs(self.provider_secs)
    }
    pub fn llm(&self) -> Duration {
        secs(self.llm_secs)
    }
}

impl ScrapeSettings {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Serve stub market data and signals without network access.
    pub offline_mode: bool,
    pub cors_origins: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            offline_mode: false,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Settings {
    /// Defaults, then `$POLYSEEK_CONFIG` if set, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut s = match env_string(ENV_CONFIG_PATH) {
            Some(p) => Self::load_from_file(&p)?,
            None => Self::default(),
        };
        s.apply_env();
        Ok(s)
    }

    /// Defaults plus environment, no file.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        s.apply_env();
        s
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let s: Settings = toml::from_str(&data)
            .with_context(|| format!("parsing settings TOML {}", path.display()))?;
        Ok(s)
    }

    fn apply_env(&mut self) {
        let a = &mut self.apis;
        if let Some(v) = env_string("POLYMARKET_API_BASE") {
            a.polymarket_base = v;
        }
        if let Some(v) = env_string("KALSHI_API_BASE") {
            a.kalshi_base = v;
        }
        overlay(&mut a.kalshi_api_key, "KALSHI_API_KEY");
        overlay(&mut a.kalshi_api_secret, "KALSHI_API_SECRET");
        overlay(&mut a.news_api_key, "NEWS_API_KEY");
        overlay(&mut a.x_bearer_token, "X_BEARER_TOKEN");
        overlay(&mut a.reddit_client_id, "REDDIT_CLIENT_ID");
        overlay(&mut a.reddit_client_secret, "REDDIT_CLIENT_SECRET");

        if let Some(v) = env_parse("SCRAPE_TIMEOUT") {
            self.scrape.timeout_secs = v;
        }
        if let Some(v) = env_parse("SCRAPE_MAX_COMMENTS") {
            self.scrape.max_comments = v;
        }
        if let Some(v) = env_parse("SCRAPE_MAX_COMMENT_CHARS") {
            self.scrape.max_comment_chars = v;
        }

        if let Some(v) = env_parse("EVIDENCE_BUDGET_QUICK") {
            self.evidence.budget_quick = v;
        }
        if let Some(v) = env_parse("EVIDENCE_BUDGET_DEEP") {
            self.evidence.budget_deep = v;
        }
        if let Some(v) = env_parse("EVIDENCE_DEDUP_KEY") {
            self.evidence.dedup_key = v;
        }
        if let Some(v) = env_parse("EVIDENCE_EXCERPT_CHARS") {
            self.evidence.excerpt_chars = v;
        }

        if let Some(v) = env_parse("PROVIDER_TIMEOUT") {
            self.timeouts.provider_secs = v;
        }
        if let Some(v) = env_parse("MARKET_TIMEOUT") {
            self.timeouts.market_secs = v;
        }
        if let Some(v) = env_parse("LLM_TIMEOUT") {
            self.timeouts.llm_secs = v;
        }

        if let Some(v) = env_string("POLYSEEK_OFFLINE") {
            self.app.offline_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_string("CORS_ORIGINS") {
            self.app.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        self.llm.apply_env();
    }
}

fn secs(v: f64) -> Duration {
    if v.is_finite() && v > 0.0 {
        Duration::from_secs_f64(v)
    } else {
        Duration::from_secs(1)
    }
}

/// Trimmed, non-empty environment value.
pub(crate) fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn overlay(slot: &mut Option<String>, name: &str) {
    if let Some(v) = env_string(name) {
        *slot = Some(v);
    }
}
