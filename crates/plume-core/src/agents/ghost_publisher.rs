//! ghost-publisher: push the writer's article to Ghost

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::seo_writer::Article;
use crate::agent::{Agent, AgentConfig, AgentError, AgentType, StepContext};
use crate::pipeline::ReviewMode;
use crate::topics::TopicStore;
use plume_tools::{GhostPost, GhostPublisherError, PostPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GhostPublisherConfig {
    pub status: PostStatus,
    /// Added to the article's own tags
    pub tags: Vec<String>,
}

impl GhostPublisherConfig {
    pub fn validate(&self) -> Vec<String> {
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            vec!["tags must not contain empty names".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutput {
    pub post_id: String,
    pub url: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

pub struct GhostPublisherAgent {
    publisher: Arc<dyn PostPublisher>,
    topics: Arc<dyn TopicStore>,
}

impl GhostPublisherAgent {
    pub fn new(publisher: Arc<dyn PostPublisher>, topics: Arc<dyn TopicStore>) -> Self {
        Self { publisher, topics }
    }

    async fn complete_topic(&self, topic_id: &str) {
        let Ok(id) = Uuid::parse_str(topic_id) else {
            error!(topic_id, "Published article carries an invalid topic id");
            return;
        };
        match self.topics.mark_completed(id).await {
            Ok(true) => info!(topic_id, "Topic completed"),
            Ok(false) => error!(topic_id, "Published article's topic no longer exists"),
            Err(e) => error!(topic_id, "Failed to complete topic: {:#}", e),
        }
    }
}

fn merge_tags(article: &[String], extra: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in article.iter().chain(extra) {
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.clone());
        }
    }
    tags
}

#[async_trait]
impl Agent for GhostPublisherAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::GhostPublisher
    }

    async fn execute(&self, ctx: &StepContext, config: &AgentConfig) -> Result<Value, AgentError> {
        let AgentConfig::GhostPublisher(config) = config else {
            return Err(AgentError::ConfigMismatch {
                agent: self.agent_type(),
                config: config.agent_type(),
            });
        };

        let article: Article = serde_json::from_value(ctx.input.clone()).map_err(|e| {
            GhostPublisherError::InvalidPost(format!("input is not an article: {}", e))
        })?;

        let status = match ctx.review_mode {
            ReviewMode::Manual => PostStatus::Draft,
            ReviewMode::Auto => config.status,
        };

        let post = GhostPost {
            title: article.title,
            html: article.html,
            excerpt: article.excerpt,
            tags: merge_tags(&article.tags, &config.tags),
            status: status.as_str().to_string(),
        };
        let published = self.publisher.publish(&post).await?;

        if let Some(topic_id) = &article.topic_id {
            self.complete_topic(topic_id).await;
        }

        let output = PublishOutput {
            post_id: published.id,
            url: published.url,
            status: published.status,
            topic_id: article.topic_id,
        };
        serde_json::to_value(&output)
            .map_err(|e| GhostPublisherError::InvalidResponse(e.to_string()).into())
    }
}
