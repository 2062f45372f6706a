//! topic-selector: claim the next topic and give it a fresh angle

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{Agent, AgentConfig, AgentError, AgentType, StepContext};
use crate::topics::{SelectionStrategy, Topic, TopicStore};
use crate::uniqueness::{UniquenessEngine, DEFAULT_MAX_MUTATION_ATTEMPTS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicSelectorConfig {
    pub project_id: String,
    pub strategy: SelectionStrategy,
    pub max_mutation_attempts: usize,
}

impl Default for TopicSelectorConfig {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            strategy: SelectionStrategy::default(),
            max_mutation_attempts: DEFAULT_MAX_MUTATION_ATTEMPTS,
        }
    }
}

impl TopicSelectorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.project_id.trim().is_empty() {
            errors.push("projectId must not be empty".to_string());
        }
        if !(1..=DEFAULT_MAX_MUTATION_ATTEMPTS).contains(&self.max_mutation_attempts) {
            errors.push(format!(
                "maxMutationAttempts must be between 1 and {}",
                DEFAULT_MAX_MUTATION_ATTEMPTS
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSelection {
    pub topic: Topic,
    pub canonical: String,
    pub angle: String,
    pub is_novel: bool,
    pub mutated: bool,
}

pub struct TopicSelectorAgent {
    topics: Arc<dyn TopicStore>,
    uniqueness: Arc<UniquenessEngine>,
}

impl TopicSelectorAgent {
    pub fn new(topics: Arc<dyn TopicStore>, uniqueness: Arc<UniquenessEngine>) -> Self {
        Self { topics, uniqueness }
    }
}

#[async_trait]
impl Agent for TopicSelectorAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::TopicSelector
    }

    async fn execute(&self, _ctx: &StepContext, config: &AgentConfig) -> Result<Value, AgentError> {
        let AgentConfig::TopicSelector(config) = config else {
            return Err(AgentError::ConfigMismatch {
                agent: self.agent_type(),
                config: config.agent_type(),
            });
        };

        // Claimed (in_progress) before any further work
        let topic = self
            .topics
            .claim_next(&config.project_id, config.strategy)
            .await
            .map_err(|e| AgentError::TopicSelector(format!("{:#}", e)))?
            .ok_or_else(|| AgentError::TopicSelector("no pending topics".to_string()))?;

        info!(
            project_id = %config.project_id,
            topic_id = %topic.id,
            title = %topic.title,
            "Claimed topic"
        );

        let outcome = self
            .uniqueness
            .resolve(&config.project_id, &topic.title, config.max_mutation_attempts)
            .await
            .map_err(|e| AgentError::TopicSelector(format!("{:#}", e)))?;

        if !outcome.is_novel {
            warn!(
                topic_id = %topic.id,
                canonical = %outcome.canonical,
                "No novel angle found, continuing with near-duplicate"
            );
        }

        let selection = TopicSelection {
            topic,
            canonical: outcome.canonical,
            angle: outcome.angle,
            is_novel: outcome.is_novel,
            mutated: outcome.mutated,
        };
        serde_json::to_value(&selection).map_err(|e| AgentError::TopicSelector(e.to_string()))
    }
}
