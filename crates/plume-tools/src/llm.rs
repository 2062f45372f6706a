//! Chat completion client (OpenRouter / any OpenAI-compatible endpoint)

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::retry::{RetryError, RetryPolicy};

pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Overrides the client's default model
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("{0}")]
    Call(#[from] RetryError),
    #[error("API key not configured")]
    NotConfigured,
    #[error("model returned no content")]
    EmptyResponse,
}

/// Anything that turns a prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

#[derive(Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    default_model: String,
    policy: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(
        api_url: &str,
        api_key: Option<String>,
        default_model: &str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.to_string(),
            policy,
        }
    }
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": &request.system },
                { "role": "user", "content": &request.prompt }
            ]
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = temperature.into();
        }

        let url = format!("{}/chat/completions", self.api_url);
        let auth = format!("Bearer {}", api_key);
        let response: Value = self
            .policy
            .post_json(&self.client, &url, Some(&auth), &body)
            .await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(model, chars = content.len(), "Chat completion received");
        Ok(content.to_string())
    }
}

/// Pull a JSON object out of a model reply that may wrap it in a code fence
pub fn extract_json_block(response: &str) -> &str {
    if let Some(rest) = response.split("```json").nth(1) {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if response.contains("```") {
        if let Some(inner) = response.split("```").nth(1) {
            return inner.trim();
        }
    }
    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response.trim(),
    }
}
