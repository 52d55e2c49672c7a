// Mnema Engine — Language-Model Provider
//
// The engine treats the language model as a pure `prompt -> text` function
// that may be unavailable. Absence is a supported mode: importance scoring
// falls back to 0.5, reflection disables itself, consolidation skips
// summary refresh.
//
// `AnthropicProvider` is the built-in implementation (non-streaming
// Messages API); other backends implement the trait.

use crate::atoms::error::{EngineError, EngineResult};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One prompt in, one completion out.
    async fn complete(&self, prompt: &str) -> EngineResult<String>;
}

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        AnthropicProvider {
            client: Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    async fn complete(&self, prompt: &str) -> EngineResult<String> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!("[provider] anthropic request ({} prompt chars)", prompt.len());
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::provider("anthropic", e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "anthropic",
                format!("{} — {}", status, body),
            ));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::provider("anthropic", e.to_string()))?;

        let text = v["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(EngineError::provider("anthropic", "empty completion"));
        }
        Ok(text)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════════════════════════════════════
