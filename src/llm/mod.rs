// src/llm/mod.rs
//! Language-model capability: `complete(prompt, transcript) -> text`.
//!
//! The orchestrator never trusts what comes back; every completion is parsed and
//! validated before any field is used.

pub mod openai;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;

use crate::analyze::Transcript;
use crate::error::LlmError;

pub use openai::OpenAiCompatClient;
pub use scripted::{ScriptStep, ScriptedClient};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `transcript` holds the accepted turns so far (empty in quick mode).
    async fn complete(&self, prompt: &str, transcript: &Transcript) -> Result<String, LlmError>;

    fn provider_name(&self) -> &'static str;
}

pub type DynLlmClient = Arc<dyn LlmClient>;
