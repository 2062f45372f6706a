//! Research provider clients
//!
//! Four interchangeable providers answer a query with citations:
//! - `perplexity`, `openai`, `openrouter`: OpenAI-compatible chat completions
//!   whose responses carry citations (top-level `citations`/`search_results`
//!   or `url_citation` annotations on the message)
//! - `tavily`: a plain search API
//!
//! [`gather_citations`] queries any subset of them through the fan-out
//! aggregator.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::fanout::{fan_out, FanOutResult, ProviderCall};
use crate::retry::{RetryError, RetryPolicy};

pub const PERPLEXITY: &str = "perplexity";
pub const TAVILY: &str = "tavily";
pub const OPENAI: &str = "openai";
pub const OPENROUTER: &str = "openrouter";

/// Provider names accepted in research configs, in default query order
pub const KNOWN_PROVIDERS: &[&str] = &[PERPLEXITY, TAVILY, OPENAI, OPENROUTER];

const PERPLEXITY_URL: &str = "https://api.perplexity.ai/chat/completions";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const TAVILY_URL: &str = "https://api.tavily.com/search";

const SNIPPET_CHARS: usize = 280;

/// A single research result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub provider_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Call(#[from] RetryError),
    #[error("API key not configured")]
    NotConfigured,
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Citation>, ProviderError>;
}

/// Query every provider concurrently, keeping at most `max_results` per provider
pub async fn gather_citations(
    providers: &[Arc<dyn ResearchProvider>],
    query: &str,
    max_results: usize,
) -> FanOutResult<Citation> {
    let calls: Vec<ProviderCall<Citation, ProviderError>> = providers
        .iter()
        .map(|provider| {
            let provider = provider.clone();
            let query = query.to_string();
            let name = provider.name().to_string();
            let call = async move {
                let mut citations = provider.search(&query, max_results).await?;
                citations.truncate(max_results);
                Ok::<_, ProviderError>(citations)
            }
            .boxed();
            (name, call)
        })
        .collect();

    let result = fan_out(calls).await;
    info!(
        query = %query,
        citations = result.items.len(),
        warnings = result.warnings.len(),
        "Research fan-out complete"
    );
    result
}

// ============================================================================
// Chat-completions providers (Perplexity, OpenAI, OpenRouter)
// ============================================================================

#[derive(Clone)]
pub struct ChatCitationProvider {
    name: String,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    policy: RetryPolicy,
}

impl ChatCitationProvider {
    pub fn new(
        name: impl Into<String>,
        api_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            policy,
        }
    }

    pub fn perplexity(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self::new(PERPLEXITY, PERPLEXITY_URL, api_key, "sonar", policy)
    }

    pub fn openai(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self::new(OPENAI, OPENAI_URL, api_key, "gpt-4o-search-preview", policy)
    }

    pub fn openrouter(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self::new(OPENROUTER, OPENROUTER_URL, api_key, "perplexity/sonar", policy)
    }
}

impl std::fmt::Debug for ChatCitationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCitationProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ResearchProvider for ChatCitationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Citation>, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::NotConfigured)?;
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a research assistant. Answer concisely and cite your sources."
                },
                { "role": "user", "content": query }
            ]
        });

        let auth = format!("Bearer {}", api_key);
        let response: Value = self
            .policy
            .post_json(&self.client, &self.api_url, Some(&auth), &body)
            .await?;

        let mut citations = parse_chat_citations(&self.name, &response)?;
        citations.truncate(max_results);
        Ok(citations)
    }
}

/// Extract citations from an OpenAI-compatible chat completion
pub fn parse_chat_citations(provider: &str, response: &Value) -> Result<Vec<Citation>, ProviderError> {
    let message = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message".to_string()))?;

    let answer = message.get("content").and_then(|v| v.as_str()).unwrap_or("");
    let fallback_snippet = truncate_chars(answer, SNIPPET_CHARS);
    let mut citations: Vec<Citation> = Vec::new();

    // Richest form first: titled search results
    if let Some(results) = response.get("search_results").and_then(|v| v.as_array()) {
        for result in results {
            let Some(url) = result.get("url").and_then(|v| v.as_str()) else {
                continue;
            };
            citations.push(Citation {
                url: url.to_string(),
                title: str_field(result, "title").unwrap_or_else(|| url.to_string()),
                snippet: str_field(result, "snippet").unwrap_or_else(|| fallback_snippet.clone()),
                provider_name: provider.to_string(),
            });
        }
    }

    if let Some(annotations) = message.get("annotations").and_then(|v| v.as_array()) {
        for annotation in annotations {
            let Some(cite) = annotation.get("url_citation") else {
                continue;
            };
            let Some(url) = cite.get("url").and_then(|v| v.as_str()) else {
                continue;
            };
            citations.push(Citation {
                url: url.to_string(),
                title: str_field(cite, "title").unwrap_or_else(|| url.to_string()),
                snippet: str_field(cite, "content").unwrap_or_else(|| fallback_snippet.clone()),
                provider_name: provider.to_string(),
            });
        }
    }

    if let Some(urls) = response.get("citations").and_then(|v| v.as_array()) {
        for url in urls.iter().filter_map(|v| v.as_str()) {
            citations.push(Citation {
                url: url.to_string(),
                title: url.to_string(),
                snippet: fallback_snippet.clone(),
                provider_name: provider.to_string(),
            });
        }
    }

    Ok(dedup_by_url(citations))
}

// ============================================================================
// Tavily
// ============================================================================

#[derive(Clone)]
pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl TavilyProvider {
    pub fn new(api_key: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            policy,
        }
    }
}

impl std::fmt::Debug for TavilyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyProvider")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ResearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        TAVILY
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Citation>, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::NotConfigured)?;
        let body = serde_json::json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
        });

        let auth = format!("Bearer {}", api_key);
        let response: TavilyResponse = self
            .policy
            .post_json(&self.client, TAVILY_URL, Some(&auth), &body)
            .await?;

        Ok(response
            .results
            .into_iter()
            .map(|r| Citation {
                title: r.title.unwrap_or_else(|| r.url.clone()),
                snippet: r
                    .content
                    .map(|c| truncate_chars(&c, SNIPPET_CHARS))
                    .unwrap_or_default(),
                url: r.url,
                provider_name: TAVILY.to_string(),
            })
            .collect())
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

fn dedup_by_url(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}
