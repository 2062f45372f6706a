//! Pipelines and their runs
//!
//! A pipeline is an ordered list of agent steps. Each execution is a
//! [`PipelineRun`] moving through `queued -> running -> completed | failed`,
//! with `current_step` counting finished steps. Order is load-bearing:
//! step i receives step i-1's output.

mod engine;
mod store;

pub use engine::RunEngine;
pub use store::{InMemoryRunStore, PgRunStore, RunStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::agent::{AgentType, PipelineStep};

// ============================================================================
// Definitions
// ============================================================================

/// Whether output goes live without a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    #[default]
    Auto,
    /// Publishing steps only ever create drafts
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub cron: Option<String>,
    /// IANA name, UTC when absent
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub review_mode: ReviewMode,
}

/// Payload carried by a pipeline job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    pub pipeline_id: String,
    /// Absent for cron-fired jobs; the run is created on dequeue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_id: Option<Uuid>,
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub review_mode: ReviewMode,
}

impl PipelineJob {
    pub fn for_definition(definition: &PipelineDefinition, run_id: Option<Uuid>) -> Self {
        Self {
            pipeline_id: definition.id.clone(),
            pipeline_run_id: run_id,
            steps: definition.steps.clone(),
            review_mode: definition.review_mode,
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Forward-only transitions
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run cannot move from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },
    #[error("run already finished all {total} steps")]
    StepOverflow { total: u32 },
    #[error("run {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Validation(#[from] crate::agent::PipelineValidationError),
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Store(e)
    }
}

/// One execution of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: String,
    pub status: RunStatus,
    /// Steps finished so far
    pub current_step: u32,
    pub total_steps: u32,
    pub current_agent: Option<String>,
    pub step_outputs: Vec<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(pipeline_id: &str, total_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline_id.to_string(),
            status: RunStatus::Queued,
            current_step: 0,
            total_steps,
            current_agent: None,
            step_outputs: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RunError> {
        self.transition(RunStatus::Running)
    }

    pub fn begin_step(&mut self, agent: AgentType) -> Result<(), RunError> {
        if self.status != RunStatus::Running {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: RunStatus::Running,
            });
        }
        if self.current_step >= self.total_steps {
            return Err(RunError::StepOverflow {
                total: self.total_steps,
            });
        }
        self.current_agent = Some(agent.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn finish_step(&mut self, output: Value) -> Result<(), RunError> {
        if self.current_step >= self.total_steps {
            return Err(RunError::StepOverflow {
                total: self.total_steps,
            });
        }
        self.step_outputs.push(output);
        self.current_step += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, result: Value) -> Result<(), RunError> {
        self.transition(RunStatus::Completed)?;
        self.current_agent = None;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), RunError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Output of the last finished step, `null` before the first
    pub fn last_output(&self) -> Value {
        self.step_outputs.last().cloned().unwrap_or(Value::Null)
    }
}
