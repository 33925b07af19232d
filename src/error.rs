//! Error taxonomy.
//!
//! Fatal errors (`RequestError`, `MarketFetchError`, `AnalysisFailure`) abort a run and
//! reach the caller as a message plus a machine-readable `kind()`. `ProviderError` and
//! scrape failures are absorbed where they happen and only reduce evidence.

use std::time::Duration;

use crate::analyze::Stage;

/// The inbound request was rejected before any fetch work started.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("market_url is empty")]
    EmptyUrl,
    #[error("invalid market url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported url scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    /// The body did not deserialize into a request (bad JSON, unknown enum value,
    /// missing field).
    #[error("invalid request body: {0}")]
    Body(String),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        "invalid_request"
    }
}

/// The market could not be identified or its metadata could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum MarketFetchError {
    #[error("Unsupported market host: {0}")]
    UnsupportedHost(String),
    #[error("Could not extract {platform} identifier from {url}")]
    MissingIdentifier { platform: &'static str, url: String },
    #[error("No market found for {platform} identifier '{id}'")]
    NotFound { platform: &'static str, id: String },
    #[error("Failed to fetch {platform} data: {message}")]
    Http {
        platform: &'static str,
        message: String,
    },
    #[error("{platform} request timed out after {}s", .after.as_secs())]
    Timeout {
        platform: &'static str,
        after: Duration,
    },
    #[error("Failed to decode {platform} response: {message}")]
    Decode {
        platform: &'static str,
        message: String,
    },
}

impl MarketFetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedHost(_) | Self::MissingIdentifier { .. } => "unsupported_market",
            Self::NotFound { .. } => "market_not_found",
            Self::Http { .. } | Self::Timeout { .. } | Self::Decode { .. } => "market_fetch_failed",
        }
    }
}

/// A signal provider failed. Never fatal: the aggregator logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} is not configured")]
    Unavailable { provider: &'static str },
    #[error("{provider} request failed: {message}")]
    Http {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned HTTP {status}")]
    Status { provider: &'static str, status: u16 },
    #[error("{provider} payload could not be parsed: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
}

/// Failure of a single language-model call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model is not configured (missing API key)")]
    NotConfigured,
    #[error("language model request failed: {0}")]
    Transport(String),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned an empty completion")]
    Empty,
    #[error("language model script exhausted")]
    ScriptExhausted,
}

/// The analysis could not produce a valid verdict. Never converted into a default verdict.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("model call failed during {stage}: {source}")]
    Llm {
        stage: Stage,
        #[source]
        source: LlmError,
    },
    #[error("model call timed out during {stage} after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },
    #[error("model output for {stage} was invalid after one repair attempt: {error}")]
    InvalidOutput { stage: Stage, error: String },
}

impl AnalysisFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm { .. } => "llm_error",
            Self::Timeout { .. } => "llm_timeout",
            Self::InvalidOutput { .. } => "invalid_model_output",
        }
    }
}

/// Everything that can end a run early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Market(#[from] MarketFetchError),
    #[error(transparent)]
    Analysis(#[from] AnalysisFailure),
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(e) => e.kind(),
            Self::Market(e) => e.kind(),
            Self::Analysis(e) => e.kind(),
        }
    }
}
