//! Scheduler for recurring pipelines and research queries
//!
//! Supports:
//! - Recurring pipelines and research queries via cron expressions
//! - Pause and resume from the static definition alone
//! - Manual "run now" triggers through the same queue
//!
//! Every schedule is a repeat rule keyed by a deterministic job id, so
//! scheduling the same definition twice leaves exactly one rule.

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::agent::PipelineValidationError;
use crate::agents::validate_providers;
use crate::pipeline::{PipelineDefinition, PipelineJob, PipelineRun, RunEngine, RunError};
use crate::queue::{JobQueue, RepeatRule, PIPELINE_QUEUE, RESEARCH_QUEUE};

pub const DEFAULT_TIMEZONE: &str = "UTC";

// ============================================================================
// Types
// ============================================================================

/// What kind of definition a job id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Pipeline,
    Research,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Pipeline => "pipeline",
            ScheduleKind::Research => "research",
        }
    }

    pub fn queue(&self) -> &'static str {
        match self {
            ScheduleKind::Pipeline => PIPELINE_QUEUE,
            ScheduleKind::Research => RESEARCH_QUEUE,
        }
    }
}

/// `scheduled-{pipeline|research}-{definitionId}`
pub fn job_id(kind: ScheduleKind, definition_id: &str) -> String {
    format!("scheduled-{}-{}", kind.as_str(), definition_id)
}

/// A saved research query that runs on a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchDefinition {
    pub id: String,
    pub query: String,
    pub providers: Vec<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesize: Option<bool>,
}

/// Payload carried by a research job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchJob {
    pub research_query_id: String,
    pub query: String,
    pub providers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesize: Option<bool>,
}

impl ResearchJob {
    pub fn for_definition(definition: &ResearchDefinition) -> Self {
        Self {
            research_query_id: definition.id.clone(),
            query: definition.query.clone(),
            providers: definition.providers.clone(),
            max_results: definition.max_results,
            synthesize: definition.synthesize,
        }
    }
}

/// Definitions file read by the daemon and the operator CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    pub pipelines: Vec<PipelineDefinition>,
    pub research: Vec<ResearchDefinition>,
}

impl Definitions {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse definitions in {}", path.display()))
    }

    pub fn pipeline(&self, id: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.id == id)
    }

    pub fn research(&self, id: &str) -> Option<&ResearchDefinition> {
        self.research.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("no future occurrences for cron expression '{0}'")]
    NoOccurrence(String),
    #[error("{kind} definition '{id}' has no cron expression")]
    MissingCron { kind: &'static str, id: String },
    #[error(transparent)]
    InvalidPipeline(#[from] PipelineValidationError),
    #[error("invalid research definition: {}", .0.join("; "))]
    InvalidResearch(Vec<String>),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("queue error: {0:#}")]
    Queue(anyhow::Error),
}

impl From<anyhow::Error> for ScheduleError {
    fn from(e: anyhow::Error) -> Self {
        ScheduleError::Queue(e)
    }
}

// ============================================================================
// Cron Utilities
// ============================================================================

/// Parse a cron expression and validate it (seconds first)
pub fn parse_cron(expression: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expression).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    timezone
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))
}

/// Next occurrence strictly after `after`, evaluated in `timezone`
pub fn next_run_after(
    cron_expr: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron(cron_expr)?;
    let tz = parse_timezone(timezone)?;

    let next = schedule
        .after(&after.with_timezone(&tz))
        .next()
        .ok_or_else(|| ScheduleError::NoOccurrence(cron_expr.to_string()))?;

    Ok(next.with_timezone(&Utc))
}

fn required_cron<'a>(
    cron: &'a Option<String>,
    kind: ScheduleKind,
    id: &str,
) -> Result<&'a str, ScheduleError> {
    cron.as_deref().ok_or_else(|| ScheduleError::MissingCron {
        kind: kind.as_str(),
        id: id.to_string(),
    })
}

fn timezone_or_default(timezone: &Option<String>) -> &str {
    timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE)
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    engine: Arc<RunEngine>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, engine: Arc<RunEngine>) -> Self {
        Self { queue, engine }
    }

    /// Upsert the repeat rule for a pipeline. Nothing is written if the
    /// cron, timezone or steps are invalid.
    pub async fn schedule_pipeline(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<RepeatRule, ScheduleError> {
        let cron = required_cron(&definition.cron, ScheduleKind::Pipeline, &definition.id)?;
        let timezone = timezone_or_default(&definition.timezone);
        let next_run_at = next_run_after(cron, timezone, Utc::now())?;
        self.engine.registry().validate_steps(&definition.steps)?;

        let payload = serde_json::to_value(PipelineJob::for_definition(definition, None))
            .map_err(anyhow::Error::from)?;
        let rule = RepeatRule {
            job_id: job_id(ScheduleKind::Pipeline, &definition.id),
            queue: PIPELINE_QUEUE.to_string(),
            cron: cron.to_string(),
            timezone: timezone.to_string(),
            payload,
            next_run_at,
        };
        self.install(&rule).await?;

        info!(
            job_id = %rule.job_id,
            cron = %rule.cron,
            timezone = %rule.timezone,
            next_run_at = %rule.next_run_at,
            "Scheduled pipeline"
        );
        Ok(rule)
    }

    /// Stop future triggers. A run already in flight is not touched.
    pub async fn pause_pipeline(&self, definition: &PipelineDefinition) -> Result<bool, ScheduleError> {
        let cron = required_cron(&definition.cron, ScheduleKind::Pipeline, &definition.id)?;
        self.pause(ScheduleKind::Pipeline, &definition.id, cron).await
    }

    pub async fn resume_pipeline(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<RepeatRule, ScheduleError> {
        self.schedule_pipeline(definition).await
    }

    pub async fn schedule_research(
        &self,
        definition: &ResearchDefinition,
    ) -> Result<RepeatRule, ScheduleError> {
        let cron = required_cron(&definition.cron, ScheduleKind::Research, &definition.id)?;
        let timezone = timezone_or_default(&definition.timezone);
        let next_run_at = next_run_after(cron, timezone, Utc::now())?;

        let mut errors = Vec::new();
        if definition.query.trim().is_empty() {
            errors.push("query must not be empty".to_string());
        }
        errors.extend(validate_providers(&definition.providers));
        if !errors.is_empty() {
            return Err(ScheduleError::InvalidResearch(errors));
        }

        let payload = serde_json::to_value(ResearchJob::for_definition(definition))
            .map_err(anyhow::Error::from)?;
        let rule = RepeatRule {
            job_id: job_id(ScheduleKind::Research, &definition.id),
            queue: RESEARCH_QUEUE.to_string(),
            cron: cron.to_string(),
            timezone: timezone.to_string(),
            payload,
            next_run_at,
        };
        self.install(&rule).await?;

        info!(
            job_id = %rule.job_id,
            cron = %rule.cron,
            next_run_at = %rule.next_run_at,
            "Scheduled research query"
        );
        Ok(rule)
    }

    pub async fn pause_research(&self, definition: &ResearchDefinition) -> Result<bool, ScheduleError> {
        let cron = required_cron(&definition.cron, ScheduleKind::Research, &definition.id)?;
        self.pause(ScheduleKind::Research, &definition.id, cron).await
    }

    pub async fn resume_research(
        &self,
        definition: &ResearchDefinition,
    ) -> Result<RepeatRule, ScheduleError> {
        self.schedule_research(definition).await
    }

    /// Queue one run right away, independent of any schedule
    pub async fn trigger_pipeline_now(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<PipelineRun, ScheduleError> {
        Ok(self.engine.trigger(definition).await?)
    }

    /// Upsert `rule`, first removing rules for the same job under another
    /// cron so an edited schedule replaces the old one
    async fn install(&self, rule: &RepeatRule) -> Result<(), ScheduleError> {
        let stale: Vec<RepeatRule> = self
            .queue
            .list_repeatable(&rule.queue)
            .await?
            .into_iter()
            .filter(|r| r.job_id == rule.job_id && r.cron != rule.cron)
            .collect();
        for old in stale {
            self.queue
                .remove_repeatable(&old.queue, &old.cron, &old.job_id)
                .await?;
            info!(
                job_id = %old.job_id,
                old_cron = %old.cron,
                cron = %rule.cron,
                "Replaced schedule with new cron"
            );
        }
        self.queue.upsert_repeatable(rule.clone()).await?;
        Ok(())
    }

    async fn pause(
        &self,
        kind: ScheduleKind,
        definition_id: &str,
        cron: &str,
    ) -> Result<bool, ScheduleError> {
        let job_id = job_id(kind, definition_id);
        let removed = self
            .queue
            .remove_repeatable(kind.queue(), cron, &job_id)
            .await?;
        if removed {
            info!(job_id = %job_id, cron, "Paused schedule");
        } else {
            info!(job_id = %job_id, cron, "No schedule to pause");
        }
        Ok(removed)
    }
}

// ============================================================================
// Background Repeat Poller
// ============================================================================

/// Spawn the background task that turns due repeat rules into ready jobs
pub fn spawn_repeat_poller(
    queue: Arc<dyn JobQueue>,
    poll_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(poll_interval_secs.max(1)));

        loop {
            interval.tick().await;

            for queue_name in [PIPELINE_QUEUE, RESEARCH_QUEUE] {
                match queue.fire_due(queue_name, Utc::now()).await {
                    Ok(0) => {}
                    Ok(fired) => debug!(queue = queue_name, fired, "Fired due repeat rules"),
                    Err(e) => error!(queue = queue_name, "Failed to poll repeat rules: {:#}", e),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRegistry, AgentType, PipelineStep};
    use crate::agents::TopicSelectorAgent;
    use crate::pipeline::{InMemoryRunStore, ReviewMode, RunStatus};
    use crate::queue::InMemoryJobQueue;
    use crate::topics::InMemoryTopicStore;
    use crate::uniqueness::{InMemoryVarietyMemory, UniquenessEngine};
    use chrono::TimeZone;

    struct Harness {
        scheduler: Scheduler,
        queue: Arc<InMemoryJobQueue>,
    }

    fn harness() -> Harness {
        let topics = Arc::new(InMemoryTopicStore::new());
        let uniqueness = Arc::new(UniquenessEngine::new(Arc::new(InMemoryVarietyMemory::new())));
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(TopicSelectorAgent::new(topics, uniqueness)));

        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = Arc::new(RunEngine::new(
            Arc::new(registry),
            Arc::new(InMemoryRunStore::new()),
            queue.clone(),
        ));
        Harness {
            scheduler: Scheduler::new(queue.clone(), engine),
            queue,
        }
    }

    fn pipeline(cron: Option<&str>) -> PipelineDefinition {
        PipelineDefinition {
            id: "weekly".to_string(),
            name: "Weekly topic".to_string(),
            steps: vec![PipelineStep::new(AgentType::TopicSelector, None)],
            cron: cron.map(str::to_string),
            timezone: Some("America/Chicago".to_string()),
            review_mode: ReviewMode::Auto,
        }
    }

    fn research(providers: &[&str]) -> ResearchDefinition {
        ResearchDefinition {
            id: "rust-news".to_string(),
            query: "rust async runtimes".to_string(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
            cron: Some("0 0 6 * * *".to_string()),
            timezone: None,
            max_results: Some(3),
            synthesize: None,
        }
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 0 9 * * 1-5").is_ok());
        assert!(parse_cron("0 */15 * * * *").is_ok());
        assert!(parse_cron("invalid").is_err());
        assert!(parse_cron("0 99 * * * *").is_err());
    }

    #[test]
    fn test_next_run_respects_timezone() {
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();

        let utc = next_run_after("0 0 9 * * *", "UTC", after).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 1, 16, 9, 0, 0).unwrap());

        // 09:00 in Chicago is 15:00 UTC in January
        let chicago = next_run_after("0 0 9 * * *", "America/Chicago", after).unwrap();
        assert_eq!(chicago, Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap());

        assert!(matches!(
            next_run_after("0 0 9 * * *", "Mars/Olympus", after),
            Err(ScheduleError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_job_ids() {
        assert_eq!(job_id(ScheduleKind::Pipeline, "weekly"), "scheduled-pipeline-weekly");
        assert_eq!(job_id(ScheduleKind::Research, "q1"), "scheduled-research-q1");
    }

    #[tokio::test]
    async fn test_changed_cron_replaces_old_rule() {
        let h = harness();
        h.scheduler
            .schedule_pipeline(&pipeline(Some("0 0 9 * * *")))
            .await
            .unwrap();
        let mut other = pipeline(Some("0 0 9 * * *"));
        other.id = "daily".to_string();
        h.scheduler.schedule_pipeline(&other).await.unwrap();

        let edited = pipeline(Some("0 30 7 * * 1"));
        h.scheduler.schedule_pipeline(&edited).await.unwrap();

        let rules = h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap();
        let weekly: Vec<_> = rules
            .iter()
            .filter(|r| r.job_id == "scheduled-pipeline-weekly")
            .collect();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].cron, "0 30 7 * * 1");
        assert!(rules.iter().any(|r| r.job_id == "scheduled-pipeline-daily"));

        // Pausing with the edited file reaches the only remaining rule
        assert!(h.scheduler.pause_pipeline(&edited).await.unwrap());
        let rules = h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].job_id, "scheduled-pipeline-daily");
    }

    #[tokio::test]
    async fn test_scheduling_twice_keeps_one_rule() {
        let h = harness();
        let definition = pipeline(Some("0 0 9 * * *"));

        h.scheduler.schedule_pipeline(&definition).await.unwrap();
        let rule = h.scheduler.schedule_pipeline(&definition).await.unwrap();

        let rules = h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].job_id, "scheduled-pipeline-weekly");
        assert_eq!(rules[0].timezone, "America/Chicago");
        assert_eq!(rules[0], rule);

        let job: PipelineJob = serde_json::from_value(rules[0].payload.clone()).unwrap();
        assert_eq!(job.pipeline_id, "weekly");
        assert!(job.pipeline_run_id.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cron_writes_nothing() {
        let h = harness();
        let err = h
            .scheduler
            .schedule_pipeline(&pipeline(Some("every tuesday")))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));

        let err = h.scheduler.schedule_pipeline(&pipeline(None)).await.unwrap_err();
        assert!(matches!(err, ScheduleError::MissingCron { .. }));

        assert!(h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_steps_write_nothing() {
        let h = harness();
        let mut definition = pipeline(Some("0 0 9 * * *"));
        definition.steps.push(PipelineStep::new(AgentType::SeoWriter, None));

        let err = h.scheduler.schedule_pipeline(&definition).await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidPipeline(_)));
        assert!(h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume_pipeline() {
        let h = harness();
        let definition = pipeline(Some("0 0 9 * * *"));
        h.scheduler.schedule_pipeline(&definition).await.unwrap();

        assert!(h.scheduler.pause_pipeline(&definition).await.unwrap());
        assert!(h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap().is_empty());
        assert!(!h.scheduler.pause_pipeline(&definition).await.unwrap());

        h.scheduler.resume_pipeline(&definition).await.unwrap();
        h.scheduler.resume_pipeline(&definition).await.unwrap();
        assert_eq!(h.queue.list_repeatable(PIPELINE_QUEUE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_research_schedule_lifecycle() {
        let h = harness();
        let definition = research(&["perplexity", "tavily"]);

        h.scheduler.schedule_research(&definition).await.unwrap();
        h.scheduler.schedule_research(&definition).await.unwrap();

        let rules = h.queue.list_repeatable(RESEARCH_QUEUE).await.unwrap();
        assert_eq!(rules.len(), 1);
        let job: ResearchJob = serde_json::from_value(rules[0].payload.clone()).unwrap();
        assert_eq!(job.research_query_id, "rust-news");
        assert_eq!(job.providers, vec!["perplexity", "tavily"]);
        assert_eq!(job.max_results, Some(3));

        assert!(h.scheduler.pause_research(&definition).await.unwrap());
        assert!(h.queue.list_repeatable(RESEARCH_QUEUE).await.unwrap().is_empty());
        h.scheduler.resume_research(&definition).await.unwrap();
        assert_eq!(h.queue.list_repeatable(RESEARCH_QUEUE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_research_rejects_unknown_provider() {
        let h = harness();
        let err = h
            .scheduler
            .schedule_research(&research(&["bing"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown provider 'bing'"));
        assert!(h.queue.list_repeatable(RESEARCH_QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_now_queues_run() {
        let h = harness();
        let run = h
            .scheduler
            .trigger_pipeline_now(&pipeline(None))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(h.queue.ready_len(PIPELINE_QUEUE).await, 1);
    }

    #[test]
    fn test_definitions_parse() {
        let definitions: Definitions = serde_json::from_str(
            r#"{
                "pipelines": [{
                    "id": "weekly",
                    "steps": [{ "agentType": "topic-selector", "config": { "strategy": "oldest" } }],
                    "cron": "0 0 9 * * MON",
                    "reviewMode": "manual"
                }]
            }"#,
        )
        .unwrap();
        assert!(definitions.research.is_empty());
        let weekly = definitions.pipeline("weekly").unwrap();
        assert_eq!(weekly.review_mode, ReviewMode::Manual);
        assert!(definitions.pipeline("daily").is_none());
    }
}
