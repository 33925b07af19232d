// src/llm/openai.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LlmClient;
use crate::analyze::Transcript;
use crate::config::LlmSettings;
use crate::error::LlmError;

const SYSTEM_PROMPT: &str = "You are Polyseek, a careful prediction-market analyst. \
Answer with a single JSON object and nothing else. Cite evidence only by the ids given to you.";

/// Max characters of an error body kept in `LlmError::Status`.
const ERROR_BODY_CHARS: usize = 300;

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

/// Any OpenAI-compatible `/chat/completions` endpoint (OpenAI, OpenRouter, local gateways).
/// Timeouts are enforced by the caller.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn messages<'a>(&self, prompt: &'a str, transcript: &'a Transcript) -> Vec<Msg<'a>> {
        let mut messages = Vec::with_capacity(transcript.len() * 2 + 2);
        messages.push(Msg {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        for turn in transcript.turns() {
            messages.push(Msg {
                role: "user",
                content: &turn.prompt,
            });
            messages.push(Msg {
                role: "assistant",
                content: &turn.response,
            });
        }
        messages.push(Msg {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, prompt: &str, transcript: &Transcript) -> Result<String, LlmError> {
        if !self.settings.has_api_key() {
            return Err(LlmError::NotConfigured);
        }

        let req = Req {
            model: &self.settings.model,
            messages: self.messages(prompt, transcript),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.settings.api_base))
            .bearer_auth(&self.settings.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("decoding completion: {e}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(target: "llm", model = %self.settings.model, chars = content.len(), "completion received");
        if content.trim().is_empty() {
            Err(LlmError::Empty)
        } else {
            Ok(content)
        }
    }

    fn provider_name(&self) -> &'static str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::Stage;

    #[test]
    fn transcript_becomes_chat_history() {
        let client = OpenAiCompatClient::new(reqwest::Client::new(), LlmSettings::default());
        let mut t = Transcript::new();
        t.push(Stage::Planning, "plan please", "{\"prior\": 0.6}");
        let msgs = client.messages("critique please", &t);
        let roles: Vec<&str> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(msgs[3].content, "critique please");
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let client = OpenAiCompatClient::new(reqwest::Client::new(), LlmSettings::default());
        let err = client.complete("x", &Transcript::new()).await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }
}
