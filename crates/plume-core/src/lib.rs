//! Plume Core Library
//!
//! Content-ops pipelines: typed agents run in order over a job queue,
//! cron schedules feed the queue, and a uniqueness engine keeps each
//! project's topics from repeating.

pub mod agent;
pub mod agents;
pub mod app;
pub mod config;
pub mod db;
pub mod pipeline;
pub mod queue;
pub mod research;
pub mod scheduler;
pub mod schema;
pub mod topics;
pub mod uniqueness;
pub mod worker;

// Re-export key types for convenience
pub use agent::{Agent, AgentConfig, AgentError, AgentRegistry, AgentType, PipelineStep};
pub use app::App;
pub use config::Config;
pub use pipeline::{PipelineDefinition, PipelineRun, RunEngine, RunStatus};
pub use research::{ResearchStore, StoredBrief};
pub use scheduler::{Definitions, ResearchDefinition, Scheduler};
pub use uniqueness::UniquenessEngine;
