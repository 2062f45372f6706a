//! Production wiring: Postgres stores, Redis queue, HTTP clients and agents

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::AgentRegistry;
use crate::agents::{GhostPublisherAgent, ResearcherAgent, SeoWriterAgent, TopicSelectorAgent};
use crate::config::Config;
use crate::db;
use crate::pipeline::{PgRunStore, RunEngine};
use crate::queue::{JobQueue, RedisJobQueue};
use crate::research::PgResearchStore;
use crate::scheduler::Scheduler;
use crate::topics::PgTopicStore;
use crate::uniqueness::{PgVarietyMemory, UniquenessEngine};
use crate::worker::Worker;
use plume_tools::research::{ChatCitationProvider, TavilyProvider};
use plume_tools::{GhostClient, OpenRouterClient, ResearchProvider, TextGenerator};

pub struct App {
    pub queue: Arc<dyn JobQueue>,
    pub engine: Arc<RunEngine>,
    pub scheduler: Scheduler,
    pub worker: Arc<Worker>,
}

impl App {
    pub async fn build(config: &Config) -> Result<Self> {
        db::run_migrations(&config.database_url)?;
        let conn = db::connect(&config.database_url)?;

        let topics = Arc::new(PgTopicStore::new(conn.clone()));
        let uniqueness = Arc::new(UniquenessEngine::new(Arc::new(PgVarietyMemory::new(
            conn.clone(),
        ))));
        let briefs = Arc::new(PgResearchStore::new(conn.clone()));
        let runs = Arc::new(PgRunStore::new(conn));
        let queue: Arc<dyn JobQueue> = Arc::new(
            RedisJobQueue::connect(&config.redis_url)
                .await
                .context("Job queue unavailable")?,
        );

        let policy = config.retry_policy();
        let llm: Arc<dyn TextGenerator> = Arc::new(OpenRouterClient::new(
            &config.openrouter_api_url,
            config.openrouter_api_key.clone(),
            &config.openrouter_model,
            policy.clone(),
        ));
        if config.openrouter_api_key.is_none() {
            warn!("OPENROUTER_API_KEY not set - seo-writer steps and synthesis will fail");
        }

        let providers: Vec<Arc<dyn ResearchProvider>> = vec![
            Arc::new(ChatCitationProvider::perplexity(
                config.perplexity_api_key.clone(),
                policy.clone(),
            )),
            Arc::new(ChatCitationProvider::openai(
                config.openai_api_key.clone(),
                policy.clone(),
            )),
            Arc::new(ChatCitationProvider::openrouter(
                config.openrouter_api_key.clone(),
                policy.clone(),
            )),
            Arc::new(TavilyProvider::new(config.tavily_api_key.clone(), policy.clone())),
        ];
        let researcher = Arc::new(ResearcherAgent::new(providers, Some(llm.clone())));

        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(TopicSelectorAgent::new(topics.clone(), uniqueness)));
        registry.register(researcher.clone());
        registry.register(Arc::new(SeoWriterAgent::new(llm)));
        match config.ghost() {
            Some((url, key)) => {
                let ghost = GhostClient::new(url, key, policy).context("Invalid Ghost settings")?;
                registry.register(Arc::new(GhostPublisherAgent::new(Arc::new(ghost), topics)));
            }
            None => warn!("Ghost not configured - pipelines with ghost-publisher steps are invalid"),
        }
        info!("Registered {} agents", registry.len());

        let engine = Arc::new(RunEngine::new(Arc::new(registry), runs, queue.clone()));
        let scheduler = Scheduler::new(queue.clone(), engine.clone());
        let worker = Arc::new(Worker::new(queue.clone(), engine.clone(), researcher, briefs));

        Ok(Self {
            queue,
            engine,
            scheduler,
            worker,
        })
    }
}
