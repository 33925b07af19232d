// src/evidence/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Evidence category. Serialized as the lowercase tag used in prompts and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Market,
    Comment,
    Sns,
    News,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Comment => "comment",
            Self::Sns => "sns",
            Self::News => "news",
        }
    }

    /// Display order used by the report's source listing.
    pub const ALL: [SourceType; 4] = [Self::Market, Self::Comment, Self::Sns, Self::News];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Pro,
    Con,
    Neutral,
    #[default]
    Unknown,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Con => "con",
            Self::Neutral => "neutral",
            Self::Unknown => "unknown",
        }
    }

    /// First-hit keyword heuristic used for news and social snippets.
    pub fn from_signal_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if ["rise", "win", "approve", "gain"]
            .iter()
            .any(|w| lowered.contains(w))
        {
            return Self::Pro;
        }
        if ["fall", "lose", "reject", "decline"]
            .iter()
            .any(|w| lowered.contains(w))
        {
            return Self::Con;
        }
        Self::Neutral
    }

    /// Vote-count heuristic used for on-platform comments (whole words only).
    pub fn from_comment_text(text: &str) -> Self {
        const PRO: [&str; 4] = ["yes", "win", "likely", "bull"];
        const CON: [&str; 4] = ["no", "lose", "unlikely", "bear"];
        let (mut pro, mut con) = (0usize, 0usize);
        for tok in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
        {
            if PRO.contains(&tok.as_str()) {
                pro += 1;
            } else if CON.contains(&tok.as_str()) {
                con += 1;
            }
        }
        match pro.cmp(&con) {
            std::cmp::Ordering::Greater => Self::Pro,
            std::cmp::Ordering::Less => Self::Con,
            std::cmp::Ordering::Equal => Self::Neutral,
        }
    }
}

/// One normalized unit of evidence.
///
/// `id` stays empty until the record is frozen into a pool; from then on it is the
/// citation handle (`SRC1`, `SRC2`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceType,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Provider or feed the record came from (e.g. "newsapi", "@handle").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SourceRecord {
    pub fn new(kind: SourceType, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            url: url.into(),
            kind,
            sentiment: Sentiment::Unknown,
            text: String::new(),
            timestamp: None,
            origin: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = sentiment;
        self
    }

    pub fn timestamp(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}
