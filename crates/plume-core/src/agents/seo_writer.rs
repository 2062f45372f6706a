//! seo-writer: turn a topic (and optional research) into an article

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::researcher::{angle_from_input, title_from_input};
use crate::agent::{Agent, AgentConfig, AgentError, AgentType, StepContext};
use plume_tools::llm::extract_json_block;
use plume_tools::{GenerationRequest, TextGenerator};

pub const MIN_WORD_COUNT: u32 = 300;
pub const MAX_WORD_COUNT: u32 = 5000;

const SYSTEM_PROMPT: &str = "You are an SEO content writer. Respond with a single JSON object \
    with keys: title (string), html (string, article body as HTML), excerpt (string, one \
    sentence) and tags (array of short strings).";

const MAX_CITATIONS_IN_PROMPT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeoWriterConfig {
    /// Overrides the client's default model
    pub model: Option<String>,
    pub target_word_count: u32,
    pub tone: String,
}

impl Default for SeoWriterConfig {
    fn default() -> Self {
        Self {
            model: None,
            target_word_count: 1200,
            tone: "informative".to_string(),
        }
    }
}

impl SeoWriterConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(MIN_WORD_COUNT..=MAX_WORD_COUNT).contains(&self.target_word_count) {
            errors.push(format!(
                "targetWordCount must be between {} and {}",
                MIN_WORD_COUNT, MAX_WORD_COUNT
            ));
        }
        if self.tone.trim().is_empty() {
            errors.push("tone must not be empty".to_string());
        }
        if matches!(&self.model, Some(m) if m.trim().is_empty()) {
            errors.push("model must not be empty when set".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub html: String,
    pub excerpt: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Draft {
    title: Option<String>,
    html: String,
    excerpt: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct SeoWriterAgent {
    llm: Arc<dyn TextGenerator>,
}

impl SeoWriterAgent {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

fn build_prompt(title: &str, angle: Option<&str>, input: &Value, config: &SeoWriterConfig) -> String {
    let mut prompt = format!(
        "Write a {}-word article in a {} tone.\nTopic: {}\n",
        config.target_word_count, config.tone, title
    );

    if let Some(angle) = angle {
        prompt.push_str(&format!("Angle: {}\n", angle));
    }
    if let Some(keywords) = input["topic"]["keywords"].as_array() {
        let keywords: Vec<&str> = keywords.iter().filter_map(|k| k.as_str()).collect();
        if !keywords.is_empty() {
            prompt.push_str(&format!("Keywords: {}\n", keywords.join(", ")));
        }
    }
    if let Some(summary) = input["synthesizedText"].as_str() {
        prompt.push_str(&format!("\nResearch summary:\n{}\n", summary));
    }
    if let Some(citations) = input["citations"].as_array() {
        let sources: Vec<String> = citations
            .iter()
            .take(MAX_CITATIONS_IN_PROMPT)
            .filter_map(|c| {
                let url = c["url"].as_str()?;
                Some(format!("- {} ({})", c["title"].as_str().unwrap_or(url), url))
            })
            .collect();
        if !sources.is_empty() {
            prompt.push_str(&format!("\nSources:\n{}\n", sources.join("\n")));
        }
    }
    prompt
}

/// Parse the model's JSON reply, falling back to treating it as raw HTML
fn parse_article(reply: &str, fallback_title: &str) -> Article {
    match serde_json::from_str::<Draft>(extract_json_block(reply)) {
        Ok(draft) => Article {
            title: draft
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| fallback_title.to_string()),
            html: draft.html,
            excerpt: draft.excerpt,
            tags: draft.tags,
            topic_id: None,
        },
        Err(e) => {
            debug!("Writer reply was not JSON ({}), using it as HTML", e);
            Article {
                title: fallback_title.to_string(),
                html: reply.to_string(),
                excerpt: None,
                tags: Vec::new(),
                topic_id: None,
            }
        }
    }
}

#[async_trait]
impl Agent for SeoWriterAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::SeoWriter
    }

    async fn execute(&self, ctx: &StepContext, config: &AgentConfig) -> Result<Value, AgentError> {
        let AgentConfig::SeoWriter(config) = config else {
            return Err(AgentError::ConfigMismatch {
                agent: self.agent_type(),
                config: config.agent_type(),
            });
        };

        let title = title_from_input(&ctx.input)
            .or_else(|| ctx.input["query"].as_str())
            .ok_or_else(|| AgentError::SeoWriter("input has no topic title".to_string()))?;

        // A step between the selector and the writer may not carry the angle
        let angle = angle_from_input(&ctx.input).or_else(|| {
            ctx.previous_outputs
                .iter()
                .rev()
                .find_map(|output| angle_from_input(output))
        });

        let request = GenerationRequest {
            model: config.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(title, angle, &ctx.input, config),
            ..Default::default()
        };
        let reply = self
            .llm
            .generate(&request)
            .await
            .map_err(|e| AgentError::SeoWriter(e.to_string()))?;

        let mut article = parse_article(&reply, title);
        article.topic_id = ctx.input["topic"]["id"].as_str().map(str::to_string);

        info!(
            run_id = %ctx.run_id,
            title = %article.title,
            chars = article.html.len(),
            "Article drafted"
        );
        serde_json::to_value(&article).map_err(|e| AgentError::SeoWriter(e.to_string()))
    }
}
