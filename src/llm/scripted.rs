// src/llm/scripted.rs
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::LlmClient;
use crate::analyze::Transcript;
use crate::error::LlmError;

/// One scripted reaction to the next `complete` call.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(String),
    /// Sleep before replying; pair with a short call timeout to simulate a hang.
    Stall(Duration),
}

/// Deterministic client for tests and local dry runs: plays a fixed script and records
/// every prompt it receives.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    prompts: Mutex<Vec<(String, usize)>>,
}

impl ScriptedClient {
    pub fn new<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = ScriptStep>,
    {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: every step is a reply.
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| ScriptStep::Reply(r.into())))
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(prompt, _)| prompt.clone()).collect())
            .unwrap_or_default()
    }

    /// Transcript length seen by each call.
    pub fn transcript_lengths(&self) -> Vec<usize> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(_, n)| *n).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, prompt: &str, transcript: &Transcript) -> Result<String, LlmError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push((prompt.to_string(), transcript.len()));
        }
        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(msg)) => Err(LlmError::Transport(msg)),
            Some(ScriptStep::Stall(d)) => {
                tokio::time::sleep(d).await;
                Err(LlmError::Transport("stalled call completed".to_string()))
            }
            None => Err(LlmError::ScriptExhausted),
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
