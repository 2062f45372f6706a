use anyhow::Result;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::path::Path;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plume_core::scheduler::spawn_repeat_poller;
use plume_core::{App, Config, Definitions};

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint - returns 200 OK when the service is running
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Schedule every definition in the file; a bad one is logged and skipped
async fn schedule_definitions(app: &App, path: &str) -> Result<()> {
    let definitions = Definitions::load(Path::new(path))?;
    info!(
        pipelines = definitions.pipelines.len(),
        research = definitions.research.len(),
        "Loaded definitions from {}",
        path
    );

    for pipeline in definitions.pipelines.iter().filter(|p| p.cron.is_some()) {
        if let Err(e) = app.scheduler.schedule_pipeline(pipeline).await {
            error!(pipeline_id = %pipeline.id, "Failed to schedule pipeline: {}", e);
        }
    }
    for research in definitions.research.iter().filter(|r| r.cron.is_some()) {
        if let Err(e) = app.scheduler.schedule_research(research).await {
            error!(research_query_id = %research.id, "Failed to schedule research: {}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "plume=debug,plume_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Plume starting up...");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);

    let app = App::build(&config).await?;

    match &config.pipelines_file {
        Some(path) => schedule_definitions(&app, path).await?,
        None => warn!("PIPELINES_FILE not set - only existing schedules will fire"),
    }

    let poller = spawn_repeat_poller(app.queue.clone(), config.scheduler_poll_secs);
    let workers = app.worker.clone().spawn(config.worker_concurrency);
    info!(
        workers = workers.len(),
        poll_secs = config.scheduler_poll_secs,
        "Scheduler and workers running"
    );

    let health_router = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());
    let health_listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.health_port)).await?;
    info!("Health check listening on port {}", config.health_port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_router).await {
            error!("Health check server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    poller.abort();
    for worker in workers {
        worker.abort();
    }
    Ok(())
}
