// src/request.rs
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RequestError;

/// Quick = one model pass; deep = planner → critic → follow-up → final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    #[default]
    Quick,
    Deep,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
        }
    }
}

/// Prompting directive controlling how hard counter-evidence must be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    #[default]
    Neutral,
    DevilsAdvocate,
}

impl Perspective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::DevilsAdvocate => "devils_advocate",
        }
    }
}

/// Immutable analysis input shared by every inbound surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub market_url: String,
    #[serde(default)]
    pub depth: Depth,
    #[serde(default)]
    pub perspective: Perspective,
}

impl AnalysisRequest {
    pub fn new(market_url: impl Into<String>, depth: Depth, perspective: Perspective) -> Self {
        Self {
            market_url: market_url.into(),
            depth,
            perspective,
        }
    }

    /// Accepts either a JSON object with the request fields or a bare market URL.
    pub fn from_prompt(prompt: &str) -> Self {
        let trimmed = prompt.trim();
        match serde_json::from_str::<AnalysisRequest>(trimmed) {
            Ok(req) => req,
            Err(_) => Self::new(trimmed, Depth::default(), Perspective::default()),
        }
    }

    /// Parse and sanity-check the URL. Runs before any network work.
    pub fn validate(&self) -> Result<Url, RequestError> {
        let raw = self.market_url.trim();
        if raw.is_empty() {
            return Err(RequestError::EmptyUrl);
        }
        let url = Url::parse(raw).map_err(|e| RequestError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(RequestError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RequestError::InvalidUrl {
                url: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(url)
    }
}
