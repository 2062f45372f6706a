//! Queue workers
//!
//! Each worker loop polls the pipeline queue, then the research queue, and
//! sleeps when both are empty. Concurrency across runs comes from running
//! several loops; steps inside one run stay sequential.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agents::{ResearcherAgent, ResearcherConfig};
use crate::pipeline::{PipelineJob, PipelineRun, RunEngine};
use crate::queue::{Job, JobQueue, PIPELINE_QUEUE, RESEARCH_QUEUE};
use crate::research::{ResearchStore, StoredBrief};
use crate::scheduler::ResearchJob;

const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(1);

/// What a worker did with one job
#[derive(Debug)]
pub enum Processed {
    Pipeline(PipelineRun),
    Research(StoredBrief),
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    engine: Arc<RunEngine>,
    researcher: Arc<ResearcherAgent>,
    briefs: Arc<dyn ResearchStore>,
    idle_delay: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        engine: Arc<RunEngine>,
        researcher: Arc<ResearcherAgent>,
        briefs: Arc<dyn ResearchStore>,
    ) -> Self {
        Self {
            queue,
            engine,
            researcher,
            briefs,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }

    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Pop and handle one job from `queue_name`; `None` when it was empty
    pub async fn process_next(&self, queue_name: &str) -> Result<Option<Processed>> {
        let Some(job) = self.queue.dequeue(queue_name).await? else {
            return Ok(None);
        };

        match queue_name {
            PIPELINE_QUEUE => self.handle_pipeline(job).await.map(Some),
            RESEARCH_QUEUE => self.handle_research(job).await.map(Some),
            other => anyhow::bail!("No handler for queue '{}'", other),
        }
    }

    async fn handle_pipeline(&self, job: Job) -> Result<Processed> {
        let payload: PipelineJob = serde_json::from_value(job.payload)
            .with_context(|| format!("Invalid pipeline job payload in {}", job.id))?;
        info!(job_id = %job.id, pipeline_id = %payload.pipeline_id, "Processing pipeline job");

        let run = self
            .engine
            .execute_job(payload)
            .await
            .with_context(|| format!("Pipeline job {} could not be tracked", job.id))?;
        Ok(Processed::Pipeline(run))
    }

    async fn handle_research(&self, job: Job) -> Result<Processed> {
        let payload: ResearchJob = serde_json::from_value(job.payload)
            .with_context(|| format!("Invalid research job payload in {}", job.id))?;
        info!(
            job_id = %job.id,
            research_query_id = %payload.research_query_id,
            "Processing research job"
        );

        let defaults = ResearcherConfig::default();
        let brief = self
            .researcher
            .research(
                &payload.query,
                &payload.providers,
                payload.max_results.unwrap_or(defaults.max_results),
                payload.synthesize.unwrap_or(defaults.synthesize),
            )
            .await;

        if !brief.warnings.is_empty() {
            warn!(
                research_query_id = %payload.research_query_id,
                warnings = ?brief.warnings,
                "Research finished with warnings"
            );
        }

        let stored = self
            .briefs
            .save(&payload.research_query_id, &brief)
            .await
            .with_context(|| format!("Failed to store brief for research job {}", job.id))?;
        info!(
            research_query_id = %payload.research_query_id,
            brief_id = stored.id,
            citations = stored.brief.citations.len(),
            "Research brief stored"
        );
        Ok(Processed::Research(stored))
    }

    /// Start `concurrency` worker loops
    pub fn spawn(self: Arc<Self>, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency.max(1))
            .map(|index| {
                let worker = self.clone();
                tokio::spawn(async move { worker.run_loop(index).await })
            })
            .collect()
    }

    async fn run_loop(&self, index: usize) {
        info!(worker = index, "Worker started");
        loop {
            let mut handled = false;
            for queue_name in [PIPELINE_QUEUE, RESEARCH_QUEUE] {
                match self.process_next(queue_name).await {
                    Ok(Some(_)) => handled = true,
                    Ok(None) => {}
                    Err(e) => {
                        handled = true;
                        error!(worker = index, queue = queue_name, "Job failed: {:#}", e);
                    }
                }
            }
            if !handled {
                tokio::time::sleep(self.idle_delay).await;
            }
        }
    }
}
