//! Agent contract
//!
//! An agent is one typed step of a pipeline. `validate` is pure and runs
//! before anything is scheduled; `execute` may do I/O and fails with a named
//! error. Missing config always means the agent's default config, so
//! execution never trips over an absent field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::{GhostPublisherConfig, ResearcherConfig, SeoWriterConfig, TopicSelectorConfig};
use crate::pipeline::ReviewMode;
use plume_tools::GhostPublisherError;

// ============================================================================
// Agent types and configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    SeoWriter,
    GhostPublisher,
    Researcher,
    TopicSelector,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::SeoWriter,
        AgentType::GhostPublisher,
        AgentType::Researcher,
        AgentType::TopicSelector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::SeoWriter => "seo-writer",
            AgentType::GhostPublisher => "ghost-publisher",
            AgentType::Researcher => "researcher",
            AgentType::TopicSelector => "topic-selector",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type '{}'", s))
    }
}

/// One configured step as stored in a pipeline definition.
///
/// `agent_type` stays a string so unknown types surface as validation
/// errors instead of deserialization failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl PipelineStep {
    pub fn new(agent_type: AgentType, config: Option<Value>) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            config,
        }
    }
}

/// Closed set of per-agent configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agentType", content = "config", rename_all = "kebab-case")]
pub enum AgentConfig {
    SeoWriter(SeoWriterConfig),
    GhostPublisher(GhostPublisherConfig),
    Researcher(ResearcherConfig),
    TopicSelector(TopicSelectorConfig),
}

impl AgentConfig {
    pub fn agent_type(&self) -> AgentType {
        match self {
            AgentConfig::SeoWriter(_) => AgentType::SeoWriter,
            AgentConfig::GhostPublisher(_) => AgentType::GhostPublisher,
            AgentConfig::Researcher(_) => AgentType::Researcher,
            AgentConfig::TopicSelector(_) => AgentType::TopicSelector,
        }
    }

    pub fn default_for(agent_type: AgentType) -> Self {
        match agent_type {
            AgentType::SeoWriter => AgentConfig::SeoWriter(Default::default()),
            AgentType::GhostPublisher => AgentConfig::GhostPublisher(Default::default()),
            AgentType::Researcher => AgentConfig::Researcher(Default::default()),
            AgentType::TopicSelector => AgentConfig::TopicSelector(Default::default()),
        }
    }

    /// Typed config from a step's raw JSON; absent or `null` means default
    pub fn parse(agent_type: AgentType, raw: Option<&Value>) -> Result<Self, String> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(Self::default_for(agent_type)),
            Some(raw) => raw.clone(),
        };

        let parsed = match agent_type {
            AgentType::SeoWriter => serde_json::from_value(raw).map(AgentConfig::SeoWriter),
            AgentType::GhostPublisher => {
                serde_json::from_value(raw).map(AgentConfig::GhostPublisher)
            }
            AgentType::Researcher => serde_json::from_value(raw).map(AgentConfig::Researcher),
            AgentType::TopicSelector => serde_json::from_value(raw).map(AgentConfig::TopicSelector),
        };
        parsed.map_err(|e| format!("invalid config: {}", e))
    }

    pub fn validate(&self) -> ValidationResult {
        let errors = match self {
            AgentConfig::SeoWriter(c) => c.validate(),
            AgentConfig::GhostPublisher(c) => c.validate(),
            AgentConfig::Researcher(c) => c.validate(),
            AgentConfig::TopicSelector(c) => c.validate(),
        };
        ValidationResult::from_errors(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// What a step sees when it runs
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    /// Zero-based
    pub step_index: usize,
    /// Output of the previous step, `null` for the first
    pub input: Value,
    pub previous_outputs: Vec<Value>,
    pub review_mode: ReviewMode,
}

impl StepContext {
    /// Context for running an agent outside a pipeline
    pub fn standalone(input: Value) -> Self {
        Self {
            run_id: Uuid::nil(),
            pipeline_id: String::new(),
            step_index: 0,
            input,
            previous_outputs: Vec::new(),
            review_mode: ReviewMode::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("SeoWriterError: {0}")]
    SeoWriter(String),
    #[error("ResearcherError: {0}")]
    Researcher(String),
    #[error("TopicSelectorError: {0}")]
    TopicSelector(String),
    #[error(transparent)]
    GhostPublisher(#[from] GhostPublisherError),
    #[error("{agent} agent cannot run with {config} config")]
    ConfigMismatch { agent: AgentType, config: AgentType },
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Pure check, no I/O
    fn validate(&self, config: &AgentConfig) -> ValidationResult {
        if config.agent_type() != self.agent_type() {
            return ValidationResult::from_errors(vec![format!(
                "expected {} config, got {}",
                self.agent_type(),
                config.agent_type()
            )]);
        }
        config.validate()
    }

    async fn execute(&self, ctx: &StepContext, config: &AgentConfig) -> Result<Value, AgentError>;
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline: {}", errors.join("; "))]
pub struct PipelineValidationError {
    pub errors: Vec<String>,
}

/// A validated step ready to run
#[derive(Clone)]
pub struct ResolvedStep {
    pub agent: Arc<dyn Agent>,
    pub config: AgentConfig,
}

impl ResolvedStep {
    pub fn agent_type(&self) -> AgentType {
        self.agent.agent_type()
    }
}

impl fmt::Debug for ResolvedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedStep")
            .field("agent_type", &self.agent_type())
            .field("config", &self.config)
            .finish()
    }
}

/// Registry of available agents
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.agent_type(), agent);
    }

    pub fn get(&self, agent_type: AgentType) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&agent_type)
    }

    pub fn has(&self, agent_type: AgentType) -> bool {
        self.agents.contains_key(&agent_type)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Validate a whole pipeline at once.
    ///
    /// Every problem in every step is reported, each prefixed with
    /// `step {n} ({agentType}):` (1-based). Nothing is returned unless all
    /// steps are valid.
    pub fn validate_steps(
        &self,
        steps: &[PipelineStep],
    ) -> Result<Vec<ResolvedStep>, PipelineValidationError> {
        if steps.is_empty() {
            return Err(PipelineValidationError {
                errors: vec!["pipeline has no steps".to_string()],
            });
        }

        let mut resolved = Vec::with_capacity(steps.len());
        let mut errors = Vec::new();

        for (i, step) in steps.iter().enumerate() {
            let prefix = format!("step {} ({})", i + 1, step.agent_type);

            let agent_type = match AgentType::from_str(&step.agent_type) {
                Ok(t) => t,
                Err(e) => {
                    errors.push(format!("{}: {}", prefix, e));
                    continue;
                }
            };
            let Some(agent) = self.get(agent_type) else {
                errors.push(format!("{}: no agent registered", prefix));
                continue;
            };
            let config = match AgentConfig::parse(agent_type, step.config.as_ref()) {
                Ok(c) => c,
                Err(e) => {
                    errors.push(format!("{}: {}", prefix, e));
                    continue;
                }
            };

            let result = agent.validate(&config);
            if result.valid {
                resolved.push(ResolvedStep {
                    agent: agent.clone(),
                    config,
                });
            } else {
                errors.extend(result.errors.iter().map(|e| format!("{}: {}", prefix, e)));
            }
        }

        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(PipelineValidationError { errors })
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
