//! researcher: fan a query out to research providers and build a brief

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{Agent, AgentConfig, AgentError, AgentType, StepContext};
use plume_tools::fanout::unavailable_warning;
use plume_tools::research::{gather_citations, KNOWN_PROVIDERS};
use plume_tools::{Citation, GenerationRequest, ResearchProvider, TextGenerator};

pub const MAX_RESULTS_LIMIT: usize = 20;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a research assistant. Summarize the findings \
    below into a concise brief for a content writer. Cite sources by URL.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResearcherConfig {
    /// Falls back to the previous step's topic title
    pub query: Option<String>,
    pub providers: Vec<String>,
    pub max_results: usize,
    pub synthesize: bool,
}

impl Default for ResearcherConfig {
    fn default() -> Self {
        Self {
            query: None,
            providers: KNOWN_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            max_results: 5,
            synthesize: false,
        }
    }
}

impl ResearcherConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if matches!(&self.query, Some(q) if q.trim().is_empty()) {
            errors.push("query must not be empty when set".to_string());
        }
        errors.extend(validate_providers(&self.providers));
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.max_results) {
            errors.push(format!("maxResults must be between 1 and {}", MAX_RESULTS_LIMIT));
        }
        errors
    }
}

/// Shared with scheduled research definitions
pub fn validate_providers(providers: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    if providers.is_empty() {
        errors.push("providers must not be empty".to_string());
    }
    let mut seen = HashSet::new();
    for provider in providers {
        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            errors.push(format!(
                "unknown provider '{}' (expected one of: {})",
                provider,
                KNOWN_PROVIDERS.join(", ")
            ));
        } else if !seen.insert(provider.as_str()) {
            errors.push(format!("provider '{}' listed twice", provider));
        }
    }
    errors
}

/// Aggregated research output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBrief {
    pub query: String,
    pub citations: Vec<Citation>,
    pub synthesized_text: Option<String>,
    pub warnings: Vec<String>,
    /// Topic carried through from a preceding topic-selector step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Value>,
    /// The selection's angle, possibly mutated for novelty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_novel: Option<bool>,
}

impl ResearchBrief {
    /// Carry the topic selection in `input` through to the next step
    fn carry_selection(&mut self, input: &Value) {
        self.topic = input.get("topic").filter(|t| !t.is_null()).cloned();
        self.angle = angle_from_input(input).map(str::to_string);
        self.canonical = input["canonical"].as_str().map(str::to_string);
        self.is_novel = input["isNovel"].as_bool();
    }
}

pub struct ResearcherAgent {
    providers: HashMap<String, Arc<dyn ResearchProvider>>,
    synthesizer: Option<Arc<dyn TextGenerator>>,
}

impl ResearcherAgent {
    pub fn new(
        providers: Vec<Arc<dyn ResearchProvider>>,
        synthesizer: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
            synthesizer,
        }
    }

    /// Run one research query. Never fails: every problem becomes a warning.
    pub async fn research(
        &self,
        query: &str,
        providers: &[String],
        max_results: usize,
        synthesize: bool,
    ) -> ResearchBrief {
        let mut warnings = Vec::new();
        let mut selected = Vec::new();
        for name in providers {
            match self.providers.get(name) {
                Some(provider) => selected.push(provider.clone()),
                None => warnings.push(unavailable_warning(name, "not configured")),
            }
        }

        let gathered = gather_citations(&selected, query, max_results).await;
        warnings.extend(gathered.warnings);
        for warning in &warnings {
            warn!(query, "{}", warning);
        }

        let synthesized_text = if synthesize && !gathered.items.is_empty() {
            self.synthesize(query, &gathered.items, &mut warnings).await
        } else {
            None
        };

        info!(
            query,
            citations = gathered.items.len(),
            warnings = warnings.len(),
            synthesized = synthesized_text.is_some(),
            "Research brief ready"
        );

        ResearchBrief {
            query: query.to_string(),
            citations: gathered.items,
            synthesized_text,
            warnings,
            topic: None,
            angle: None,
            canonical: None,
            is_novel: None,
        }
    }

    async fn synthesize(
        &self,
        query: &str,
        citations: &[Citation],
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let Some(synthesizer) = &self.synthesizer else {
            warnings.push("Synthesis unavailable: no language model configured".to_string());
            return None;
        };

        let sources: String = citations
            .iter()
            .map(|c| format!("- {} ({}): {}\n", c.title, c.url, c.snippet))
            .collect();
        let request = GenerationRequest {
            system: SYNTHESIS_SYSTEM_PROMPT.to_string(),
            prompt: format!("Query: {}\n\nSources:\n{}", query, sources),
            ..Default::default()
        };

        match synthesizer.generate(&request).await {
            Ok(text) => Some(text),
            Err(e) => {
                warnings.push(format!("Synthesis unavailable: {}", e));
                None
            }
        }
    }
}

/// `topic.title` from a topic selection, or a bare `title`
pub fn title_from_input(input: &Value) -> Option<&str> {
    input["topic"]["title"]
        .as_str()
        .or_else(|| input["title"].as_str())
        .filter(|t| !t.trim().is_empty())
}

pub fn angle_from_input(input: &Value) -> Option<&str> {
    input["angle"].as_str().filter(|a| !a.trim().is_empty())
}

/// Topic title narrowed by the selection's angle, unless the title already
/// mentions it
fn query_for_selection(title: &str, angle: Option<&str>) -> String {
    match angle {
        Some(angle) if !title.to_lowercase().contains(&angle.to_lowercase()) => {
            format!("{} {}", title, angle)
        }
        _ => title.to_string(),
    }
}

#[async_trait]
impl Agent for ResearcherAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Researcher
    }

    async fn execute(&self, ctx: &StepContext, config: &AgentConfig) -> Result<Value, AgentError> {
        let AgentConfig::Researcher(config) = config else {
            return Err(AgentError::ConfigMismatch {
                agent: self.agent_type(),
                config: config.agent_type(),
            });
        };

        let query = match config.query.as_deref() {
            Some(query) => query.to_string(),
            None => title_from_input(&ctx.input)
                .map(|title| query_for_selection(title, angle_from_input(&ctx.input)))
                .ok_or_else(|| {
                    AgentError::Researcher(
                        "no query configured and no topic title in input".to_string(),
                    )
                })?,
        };

        let mut brief = self
            .research(&query, &config.providers, config.max_results, config.synthesize)
            .await;
        brief.carry_selection(&ctx.input);

        serde_json::to_value(&brief).map_err(|e| AgentError::Researcher(e.to_string()))
    }
}
