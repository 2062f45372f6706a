//! Plume Tools - outbound service plumbing for pipeline agents
//!
//! - retry: resilient call policy shared by every HTTP client
//! - fanout: concurrent calls to interchangeable providers
//! - research: Perplexity / Tavily / OpenAI / OpenRouter citation providers
//! - llm: chat completion client
//! - ghost: Ghost Admin API publisher

pub mod fanout;
pub mod ghost;
pub mod llm;
pub mod research;
pub mod retry;

pub use fanout::{fan_out, FanOutResult};
pub use ghost::{GhostClient, GhostPost, GhostPublisherError, PostPublisher, PublishedPost};
pub use llm::{GenerationRequest, LlmError, OpenRouterClient, TextGenerator};
pub use research::{Citation, ProviderError, ResearchProvider};
pub use retry::{CallError, Disposition, RetryError, RetryPolicy};
