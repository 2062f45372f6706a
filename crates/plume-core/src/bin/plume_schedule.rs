//! Operator CLI for pipeline and research schedules
//!
//! Usage:
//!   plume-schedule schedule <definitions.json> <id>
//!   plume-schedule pause    <definitions.json> <id>
//!   plume-schedule resume   <definitions.json> <id>
//!   plume-schedule trigger  <definitions.json> <id>
//!
//! `<id>` is looked up among pipelines first, then research queries.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plume_core::{App, Config, Definitions};

const USAGE: &str = "usage: plume-schedule <schedule|pause|resume|trigger> <definitions.json> <id>";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Schedule,
    Pause,
    Resume,
    Trigger,
}

impl std::str::FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "schedule" => Ok(Command::Schedule),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "trigger" => Ok(Command::Trigger),
            _ => Err(anyhow::anyhow!("Unknown command '{}'\n{}", s, USAGE)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "plume_core=info,warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [command, file, id] = args.as_slice() else {
        anyhow::bail!(USAGE);
    };
    let command: Command = command.parse()?;
    let definitions = Definitions::load(Path::new(file))?;

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let app = App::build(&config).await?;
    let scheduler = &app.scheduler;

    if let Some(pipeline) = definitions.pipeline(id) {
        match command {
            Command::Schedule | Command::Resume => {
                let rule = scheduler.schedule_pipeline(pipeline).await?;
                println!("{} scheduled, next run at {}", rule.job_id, rule.next_run_at);
            }
            Command::Pause => {
                let removed = scheduler.pause_pipeline(pipeline).await?;
                println!("{}", paused_message(id, removed));
            }
            Command::Trigger => {
                let run = scheduler.trigger_pipeline_now(pipeline).await?;
                println!("run {} queued for pipeline {}", run.id, pipeline.id);
            }
        }
        return Ok(());
    }

    let research = definitions
        .research(id)
        .with_context(|| format!("No pipeline or research definition '{}' in {}", id, file))?;
    match command {
        Command::Schedule | Command::Resume => {
            let rule = scheduler.schedule_research(research).await?;
            println!("{} scheduled, next run at {}", rule.job_id, rule.next_run_at);
        }
        Command::Pause => {
            let removed = scheduler.pause_research(research).await?;
            println!("{}", paused_message(id, removed));
        }
        Command::Trigger => anyhow::bail!("trigger only applies to pipelines"),
    }
    Ok(())
}

fn paused_message(id: &str, removed: bool) -> String {
    if removed {
        format!("{} paused", id)
    } else {
        format!("{} had no active schedule", id)
    }
}
