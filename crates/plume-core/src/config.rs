use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use plume_tools::llm::{DEFAULT_MODEL, DEFAULT_OPENROUTER_URL};
use plume_tools::RetryPolicy;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,

    pub openrouter_api_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,

    // Research providers; a missing key leaves that provider unconfigured
    pub perplexity_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub openai_api_key: Option<String>,

    pub ghost_api_url: Option<String>,
    pub ghost_admin_api_key: Option<String>,

    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Per attempt
    pub request_timeout_secs: u64,

    pub worker_concurrency: usize,
    pub scheduler_poll_secs: u64,
    pub health_port: u16,

    /// JSON definitions scheduled at startup
    pub pipelines_file: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            openrouter_api_url: std::env::var("OPENROUTER_API_URL")
                .unwrap_or_else(|_| DEFAULT_OPENROUTER_URL.to_string()),
            openrouter_api_key: non_empty_var("OPENROUTER_API_KEY"),
            openrouter_model: std::env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),

            perplexity_api_key: non_empty_var("PERPLEXITY_API_KEY"),
            tavily_api_key: non_empty_var("TAVILY_API_KEY"),
            openai_api_key: non_empty_var("OPENAI_API_KEY"),

            ghost_api_url: non_empty_var("GHOST_API_URL"),
            ghost_admin_api_key: non_empty_var("GHOST_ADMIN_API_KEY"),

            retry_max_attempts: parse_var("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_var("RETRY_BASE_DELAY_MS", 100)?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 30)?,

            worker_concurrency: parse_var("WORKER_CONCURRENCY", 2)?,
            scheduler_poll_secs: parse_var("SCHEDULER_POLL_SECS", 15)?,
            health_port: parse_var("HEALTH_PORT", 8080)?,

            pipelines_file: non_empty_var("PIPELINES_FILE"),
        })
    }

    /// Policy handed to every outbound client
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts.max(1),
            Duration::from_millis(self.retry_base_delay_ms),
        )
        .with_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    /// Ghost URL and admin key, when both are set
    pub fn ghost(&self) -> Option<(&str, &str)> {
        match (&self.ghost_api_url, &self.ghost_admin_api_key) {
            (Some(url), Some(key)) => Some((url, key)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &self.redis_url)
            .field("openrouter_api_url", &self.openrouter_api_url)
            .field("openrouter_api_key", &redact(&self.openrouter_api_key))
            .field("openrouter_model", &self.openrouter_model)
            .field("perplexity_api_key", &redact(&self.perplexity_api_key))
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("ghost_api_url", &self.ghost_api_url)
            .field("ghost_admin_api_key", &redact(&self.ghost_admin_api_key))
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("scheduler_poll_secs", &self.scheduler_poll_secs)
            .field("health_port", &self.health_port)
            .field("pipelines_file", &self.pipelines_file)
            .finish()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid {}", key, std::any::type_name::<T>())),
        None => Ok(default),
    }
}
