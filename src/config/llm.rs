// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    8192
}

/// Language-model backend settings (any OpenAI-compatible chat completions endpoint).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_base: String,
    pub model: String,
    /// `"ENV"` (or empty) means: resolve from the environment at load time.
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

// Keys never reach logs through Debug.
impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key_len", &self.api_key.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmSettings {
    pub(crate) fn apply_env(&mut self) {
        if let Some(v) = super::env_string("LLM_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = super::env_string("LLM_MODEL") {
            self.model = v;
        }
        if let Some(v) = super::env_parse("LLM_TEMPERATURE") {
            self.temperature = v;
        }
        if let Some(v) = super::env_parse("LLM_MAX_TOKENS") {
            self.max_tokens = v;
        }

        if self.api_key.trim().is_empty() || self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = ["POLYSEEK_LLM_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]
                .iter()
                .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty()))
                .unwrap_or_default();
        }

        self.sanitize();
    }

    fn sanitize(&mut self) {
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        self.api_base = self.api_base.trim_end_matches('/').to_string();
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut s = LlmSettings {
            api_base: "https://api.openai.com/v1/".into(),
            temperature: 9.0,
            max_tokens: 0,
            ..Default::default()
        };
        s.sanitize();
        assert_eq!(s.api_base, "https://api.openai.com/v1");
        assert!((s.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(s.max_tokens, 8192);
    }

    #[test]
    fn debug_hides_key() {
        let s = LlmSettings {
            api_key: "sk-secret".into(),
            ..Default::default()
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("api_key_len: 9"));
    }
}
