//! Concrete pipeline agents
//!
//! Collaborators (LLM, Ghost, research providers, stores) are injected so
//! every agent runs against fakes in tests.

mod ghost_publisher;
mod researcher;
mod seo_writer;
mod topic_selector;

pub use ghost_publisher::{GhostPublisherAgent, GhostPublisherConfig, PostStatus, PublishOutput};
pub use researcher::{
    angle_from_input, title_from_input, validate_providers, ResearchBrief, ResearcherAgent,
    ResearcherConfig,
};
pub use seo_writer::{Article, SeoWriterAgent, SeoWriterConfig};
pub use topic_selector::{TopicSelection, TopicSelectorAgent, TopicSelectorConfig};
