//! Run engine: trigger runs and execute their steps in order

use std::sync::Arc;
use tracing::{error, info, warn};

use super::{PipelineDefinition, PipelineJob, PipelineRun, RunError, RunStatus, RunStore};
use crate::agent::{AgentRegistry, StepContext};
use crate::queue::{Job, JobQueue, PIPELINE_QUEUE};

pub struct RunEngine {
    registry: Arc<AgentRegistry>,
    runs: Arc<dyn RunStore>,
    queue: Arc<dyn JobQueue>,
}

impl RunEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        runs: Arc<dyn RunStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            registry,
            runs,
            queue,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    /// Validate, record a `queued` run and enqueue it.
    ///
    /// An invalid definition is rejected before anything is written.
    pub async fn trigger(&self, definition: &PipelineDefinition) -> Result<PipelineRun, RunError> {
        self.registry.validate_steps(&definition.steps)?;

        let run = PipelineRun::new(&definition.id, step_count(definition.steps.len()));
        self.runs.create(&run).await?;

        let payload = PipelineJob::for_definition(definition, Some(run.id));
        let payload = serde_json::to_value(&payload).map_err(anyhow::Error::from)?;
        self.queue
            .enqueue(Job::new(PIPELINE_QUEUE, format!("manual-{}", run.id), payload))
            .await?;

        info!(
            run_id = %run.id,
            pipeline_id = %definition.id,
            total_steps = run.total_steps,
            "Pipeline run queued"
        );
        Ok(run)
    }

    /// Execute a dequeued pipeline job to completion or failure.
    ///
    /// A failing step fails the run and stops it; the returned run carries
    /// the outcome. `Err` means progress could not be persisted: a run that
    /// had started is then marked failed if the store accepts the write.
    pub async fn execute_job(&self, job: PipelineJob) -> Result<PipelineRun, RunError> {
        let mut run = match job.pipeline_run_id {
            Some(id) => self.runs.get(id).await?.ok_or(RunError::NotFound(id))?,
            None => {
                let run = PipelineRun::new(&job.pipeline_id, step_count(job.steps.len()));
                self.runs.create(&run).await?;
                info!(run_id = %run.id, pipeline_id = %job.pipeline_id, "Created run for scheduled job");
                run
            }
        };

        if run.status != RunStatus::Queued {
            warn!(run_id = %run.id, status = %run.status, "Run already picked up, skipping");
            return Ok(run);
        }

        run.start()?;
        if let Err(e) = self.drive(&mut run, &job).await {
            self.abort(&mut run, &e).await;
            return Err(e);
        }
        Ok(run)
    }

    /// Persist the started run and execute its steps
    async fn drive(&self, run: &mut PipelineRun, job: &PipelineJob) -> Result<(), RunError> {
        self.runs.update(run).await?;
        info!(run_id = %run.id, pipeline_id = %run.pipeline_id, "Pipeline run started");

        let steps = match self.registry.validate_steps(&job.steps) {
            Ok(steps) => steps,
            Err(e) => {
                error!(run_id = %run.id, "Pipeline definition invalid: {}", e);
                run.fail(e.to_string())?;
                self.runs.update(run).await?;
                return Ok(());
            }
        };

        for (index, step) in steps.iter().enumerate() {
            let agent_type = step.agent_type();
            run.begin_step(agent_type)?;
            self.runs.update(run).await?;

            let ctx = StepContext {
                run_id: run.id,
                pipeline_id: run.pipeline_id.clone(),
                step_index: index,
                input: run.last_output(),
                previous_outputs: run.step_outputs.clone(),
                review_mode: job.review_mode,
            };

            match step.agent.execute(&ctx, &step.config).await {
                Ok(output) => {
                    run.finish_step(output)?;
                    self.runs.update(run).await?;
                    info!(
                        run_id = %run.id,
                        step = run.current_step,
                        total = run.total_steps,
                        agent = %agent_type,
                        "Step completed"
                    );
                }
                Err(e) => {
                    let message = format!("step {} ({}): {}", index + 1, agent_type, e);
                    error!(run_id = %run.id, "Pipeline run failed at {}", message);
                    run.fail(message)?;
                    self.runs.update(run).await?;
                    return Ok(());
                }
            }
        }

        let result = run.last_output();
        run.complete(result)?;
        self.runs.update(run).await?;
        info!(run_id = %run.id, pipeline_id = %run.pipeline_id, "Pipeline run completed");
        Ok(())
    }

    /// Best-effort terminal write after `drive` gave up, so a started run
    /// never stays `running`
    async fn abort(&self, run: &mut PipelineRun, cause: &RunError) {
        error!(run_id = %run.id, "Pipeline run aborted: {}", cause);
        if !run.status.is_terminal() {
            if let Err(e) = run.fail(format!("run aborted: {}", cause)) {
                error!(run_id = %run.id, "Cannot mark aborted run failed: {}", e);
                return;
            }
        }
        match self.runs.update(run).await {
            Ok(()) => warn!(run_id = %run.id, status = %run.status, "Recorded aborted run"),
            Err(e) => error!(run_id = %run.id, "Failed to record aborted run: {:#}", e),
        }
    }
}

fn step_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentConfig, AgentError, AgentType, PipelineStep};
    use crate::pipeline::{InMemoryRunStore, ReviewMode};
    use crate::queue::InMemoryJobQueue;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedAgent {
        agent_type: AgentType,
        fail: bool,
        inputs: Mutex<Vec<(Value, ReviewMode)>>,
    }

    impl ScriptedAgent {
        fn new(agent_type: AgentType, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                agent_type,
                fail,
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        async fn execute(&self, ctx: &StepContext, _config: &AgentConfig) -> Result<Value, AgentError> {
            self.inputs
                .lock()
                .unwrap()
                .push((ctx.input.clone(), ctx.review_mode));
            if self.fail {
                return Err(AgentError::SeoWriter("model unavailable".to_string()));
            }
            Ok(json!({ "agent": self.agent_type.as_str(), "step": ctx.step_index }))
        }
    }

    struct Harness {
        engine: RunEngine,
        runs: Arc<InMemoryRunStore>,
        queue: Arc<InMemoryJobQueue>,
        selector: Arc<ScriptedAgent>,
        writer: Arc<ScriptedAgent>,
        publisher: Arc<ScriptedAgent>,
    }

    fn harness(writer_fails: bool) -> Harness {
        let selector = ScriptedAgent::new(AgentType::TopicSelector, false);
        let writer = ScriptedAgent::new(AgentType::SeoWriter, writer_fails);
        let publisher = ScriptedAgent::new(AgentType::GhostPublisher, false);

        let mut registry = AgentRegistry::new();
        registry.register(selector.clone());
        registry.register(writer.clone());
        registry.register(publisher.clone());

        let runs = Arc::new(InMemoryRunStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        Harness {
            engine: RunEngine::new(Arc::new(registry), runs.clone(), queue.clone()),
            runs,
            queue,
            selector,
            writer,
            publisher,
        }
    }

    fn definition() -> PipelineDefinition {
        PipelineDefinition {
            id: "weekly".to_string(),
            name: "Weekly post".to_string(),
            steps: vec![
                PipelineStep::new(AgentType::TopicSelector, None),
                PipelineStep::new(AgentType::SeoWriter, None),
                PipelineStep::new(AgentType::GhostPublisher, None),
            ],
            cron: None,
            timezone: None,
            review_mode: ReviewMode::Manual,
        }
    }

    async fn dequeue_job(queue: &InMemoryJobQueue) -> PipelineJob {
        let job = queue.dequeue(PIPELINE_QUEUE).await.unwrap().unwrap();
        serde_json::from_value(job.payload).unwrap()
    }

    #[tokio::test]
    async fn test_trigger_queues_run_and_job() {
        let h = harness(false);
        let run = h.engine.trigger(&definition()).await.unwrap();

        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.current_step, 0);
        assert_eq!(run.total_steps, 3);

        let job = dequeue_job(&h.queue).await;
        assert_eq!(job.pipeline_id, "weekly");
        assert_eq!(job.pipeline_run_id, Some(run.id));
        assert_eq!(job.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_definition_writes_nothing() {
        let h = harness(false);
        let mut definition = definition();
        definition.steps.push(PipelineStep {
            agent_type: "fax-sender".to_string(),
            config: None,
        });

        let err = h.engine.trigger(&definition).await.unwrap_err();
        assert!(matches!(err, RunError::Validation(_)));
        assert!(err.to_string().contains("step 4 (fax-sender)"));
        assert!(h.runs.list_for_pipeline("weekly", 10).await.unwrap().is_empty());
        assert_eq!(h.queue.ready_len(PIPELINE_QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_chain_outputs() {
        let h = harness(false);
        let queued = h.engine.trigger(&definition()).await.unwrap();
        let run = h.engine.execute_job(dequeue_job(&h.queue).await).await.unwrap();

        assert_eq!(run.id, queued.id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.current_step, 3);
        assert_eq!(run.step_outputs.len(), 3);
        assert_eq!(run.result, Some(json!({ "agent": "ghost-publisher", "step": 2 })));

        let selector_inputs = h.selector.inputs.lock().unwrap();
        assert_eq!(selector_inputs[0].0, Value::Null);
        let writer_inputs = h.writer.inputs.lock().unwrap();
        assert_eq!(writer_inputs[0].0, json!({ "agent": "topic-selector", "step": 0 }));
        let publisher_inputs = h.publisher.inputs.lock().unwrap();
        assert_eq!(publisher_inputs[0].0, json!({ "agent": "seo-writer", "step": 1 }));
        assert_eq!(publisher_inputs[0].1, ReviewMode::Manual);
    }

    #[tokio::test]
    async fn test_failed_step_aborts_run() {
        let h = harness(true);
        h.engine.trigger(&definition()).await.unwrap();
        let run = h.engine.execute_job(dequeue_job(&h.queue).await).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.current_step, 1);
        assert_eq!(
            run.error.as_deref(),
            Some("step 2 (seo-writer): SeoWriterError: model unavailable")
        );
        assert!(run.result.is_none());
        assert!(h.publisher.inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let h = harness(false);
        let queued = h.engine.trigger(&definition()).await.unwrap();
        h.engine.execute_job(dequeue_job(&h.queue).await).await.unwrap();

        let history = h.runs.history(queued.id).await;
        assert!(history.len() > 3);
        for pair in history.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            assert!(after.current_step >= before.current_step);
            assert!(after.current_step <= after.total_steps);
            assert!(
                before.status == after.status || before.status.can_transition_to(after.status),
                "{} -> {}",
                before.status,
                after.status
            );
        }
        assert_eq!(history.last().unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_scheduled_job_creates_its_run() {
        let h = harness(false);
        let job = PipelineJob::for_definition(&definition(), None);

        let run = h.engine.execute_job(job).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(h.runs.list_for_pipeline("weekly", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_job_is_not_rerun() {
        let h = harness(false);
        h.engine.trigger(&definition()).await.unwrap();
        let job = dequeue_job(&h.queue).await;

        h.engine.execute_job(job.clone()).await.unwrap();
        let again = h.engine.execute_job(job).await.unwrap();

        assert_eq!(again.status, RunStatus::Completed);
        assert_eq!(h.selector.inputs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_scheduled_job_fails_run() {
        let h = harness(false);
        let mut job = PipelineJob::for_definition(&definition(), None);
        job.steps.clear();

        let run = h.engine.execute_job(job).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("invalid pipeline: pipeline has no steps"));
    }

    #[tokio::test]
    async fn test_unknown_run_id() {
        let h = harness(false);
        let mut job = PipelineJob::for_definition(&definition(), None);
        job.pipeline_run_id = Some(uuid::Uuid::new_v4());
        assert!(matches!(
            h.engine.execute_job(job).await,
            Err(RunError::NotFound(_))
        ));
    }

    /// Fails exactly one `update` call, counted from 1
    struct FlakyRunStore {
        inner: InMemoryRunStore,
        fail_on: usize,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl RunStore for FlakyRunStore {
        async fn create(&self, run: &PipelineRun) -> anyhow::Result<()> {
            self.inner.create(run).await
        }

        async fn update(&self, run: &PipelineRun) -> anyhow::Result<()> {
            if self.updates.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                anyhow::bail!("connection reset");
            }
            self.inner.update(run).await
        }

        async fn get(&self, run_id: uuid::Uuid) -> anyhow::Result<Option<PipelineRun>> {
            self.inner.get(run_id).await
        }

        async fn list_for_pipeline(
            &self,
            pipeline_id: &str,
            limit: i64,
        ) -> anyhow::Result<Vec<PipelineRun>> {
            self.inner.list_for_pipeline(pipeline_id, limit).await
        }
    }

    fn flaky_engine(fail_on: usize) -> (RunEngine, Arc<FlakyRunStore>, Arc<InMemoryJobQueue>) {
        let mut registry = AgentRegistry::new();
        registry.register(ScriptedAgent::new(AgentType::TopicSelector, false));
        registry.register(ScriptedAgent::new(AgentType::SeoWriter, false));
        registry.register(ScriptedAgent::new(AgentType::GhostPublisher, false));

        let runs = Arc::new(FlakyRunStore {
            inner: InMemoryRunStore::new(),
            fail_on,
            updates: AtomicUsize::new(0),
        });
        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = RunEngine::new(Arc::new(registry), runs.clone(), queue.clone());
        (engine, runs, queue)
    }

    #[tokio::test]
    async fn test_store_error_mid_run_marks_run_failed() {
        // updates: 1 start, 2 begin step 1, 3 finish step 1
        let (engine, runs, queue) = flaky_engine(3);
        let queued = engine.trigger(&definition()).await.unwrap();
        let job = dequeue_job(&queue).await;

        let err = engine.execute_job(job.clone()).await.unwrap_err();
        assert!(matches!(err, RunError::Store(_)));

        let stored = runs.get(queued.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored
            .error
            .as_deref()
            .unwrap()
            .starts_with("run aborted: store error: connection reset"));

        let again = engine.execute_job(job).await.unwrap();
        assert_eq!(again.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_store_error_on_completion_is_retried() {
        // updates: 1 start, 2..=7 three steps, 8 complete
        let (engine, runs, queue) = flaky_engine(8);
        let queued = engine.trigger(&definition()).await.unwrap();

        assert!(engine.execute_job(dequeue_job(&queue).await).await.is_err());
        let stored = runs.get(queued.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.current_step, 3);
    }

    // ========================================================================
    // Real agents end to end
    // ========================================================================

    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl plume_tools::TextGenerator for RecordingLlm {
        async fn generate(
            &self,
            request: &plume_tools::GenerationRequest,
        ) -> Result<String, plume_tools::LlmError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(r#"{"title": "React hooks, securely", "html": "<p>body</p>"}"#.to_string())
        }
    }

    #[tokio::test]
    async fn test_mutated_angle_reaches_writer_prompt() {
        use crate::agents::{ResearcherAgent, SeoWriterAgent, TopicSelectorAgent};
        use crate::topics::{InMemoryTopicStore, NewTopic, TopicStore};
        use crate::uniqueness::{InMemoryVarietyMemory, UniquenessEngine};

        let topics = Arc::new(InMemoryTopicStore::new());
        topics
            .insert(NewTopic {
                project_id: "blog".to_string(),
                title: "Guide to React hooks".to_string(),
                keywords: vec!["react".to_string()],
                seo_score: 50,
            })
            .await
            .unwrap();
        let memory = Arc::new(InMemoryVarietyMemory::new());
        memory
            .seed("blog", ["guide | react | hooks".to_string()])
            .await;
        let uniqueness =
            Arc::new(UniquenessEngine::new(memory).with_angle_pool(vec!["security".to_string()]));
        let llm = Arc::new(RecordingLlm {
            prompts: Mutex::new(Vec::new()),
        });

        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(TopicSelectorAgent::new(topics, uniqueness)));
        registry.register(Arc::new(ResearcherAgent::new(Vec::new(), None)));
        registry.register(Arc::new(SeoWriterAgent::new(llm.clone())));
        let queue = Arc::new(InMemoryJobQueue::new());
        let engine = RunEngine::new(
            Arc::new(registry),
            Arc::new(InMemoryRunStore::new()),
            queue.clone(),
        );

        let definition = PipelineDefinition {
            id: "react".to_string(),
            name: "React posts".to_string(),
            steps: vec![
                PipelineStep::new(AgentType::TopicSelector, Some(json!({ "projectId": "blog" }))),
                PipelineStep::new(AgentType::Researcher, None),
                PipelineStep::new(AgentType::SeoWriter, None),
            ],
            cron: None,
            timezone: None,
            review_mode: ReviewMode::Auto,
        };
        engine.trigger(&definition).await.unwrap();
        let run = engine.execute_job(dequeue_job(&queue).await).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error);
        assert_eq!(run.step_outputs[0]["angle"], "security");
        assert_eq!(run.step_outputs[0]["mutated"], true);
        assert_eq!(run.step_outputs[1]["query"], "Guide to React hooks security");
        assert_eq!(run.step_outputs[1]["angle"], "security");

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Topic: Guide to React hooks\n"), "{}", prompts[0]);
        assert!(prompts[0].contains("Angle: security\n"), "{}", prompts[0]);
        assert!(prompts[0].contains("Keywords: react"), "{}", prompts[0]);
    }
}
