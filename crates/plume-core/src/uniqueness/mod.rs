//! Content Uniqueness Engine
//!
//! Keeps a project from covering the same ground twice:
//! 1. Canonicalize - reduce a title to `intent | entity | angle`
//! 2. Novelty - Jaccard-compare against the project's variety memory
//! 3. Mutate - on collision, swap the angle from an ordered pool
//!
//! The resolved line is always appended to memory, novel or not. Resolution
//! and append happen under one per-project lock owned by the store.

mod canonical;
mod mutate;
mod novelty;
mod store;

pub use canonical::{canonicalize, tokenize, CanonicalForm};
pub use mutate::{default_angle_pool, mutate, Mutation, DEFAULT_ANGLE_POOL};
pub use novelty::{check_novelty, jaccard, Novelty, OVERLAP_THRESHOLD};
pub use store::{InMemoryVarietyMemory, PgVarietyMemory, Resolver, VarietyMemory};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_MUTATION_ATTEMPTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniquenessOutcome {
    /// The line that was appended to memory
    pub canonical: String,
    pub intent: String,
    pub entity: String,
    pub angle: String,
    pub is_novel: bool,
    pub mutated: bool,
    /// Mutation candidates tried (0 when the original was novel)
    pub attempts: u32,
}

/// Novelty check plus mutation against a memory snapshot
pub fn resolve_against(
    form: &CanonicalForm,
    memory: &[String],
    pool: &[String],
    max_attempts: usize,
) -> UniquenessOutcome {
    if check_novelty(&form.line(), memory).is_novel() {
        return outcome(form.clone(), true, false, 0);
    }

    let mutation = mutate(form, memory, pool, max_attempts);
    let mutated = mutation.form != *form;
    outcome(mutation.form, mutation.is_novel, mutated, mutation.attempts)
}

fn outcome(form: CanonicalForm, is_novel: bool, mutated: bool, attempts: u32) -> UniquenessOutcome {
    UniquenessOutcome {
        canonical: form.line(),
        intent: form.intent,
        entity: form.entity,
        angle: form.angle,
        is_novel,
        mutated,
        attempts,
    }
}

pub struct UniquenessEngine {
    memory: Arc<dyn VarietyMemory>,
    angle_pool: Arc<Vec<String>>,
}

impl UniquenessEngine {
    pub fn new(memory: Arc<dyn VarietyMemory>) -> Self {
        Self {
            memory,
            angle_pool: Arc::new(default_angle_pool()),
        }
    }

    /// Replace the angle pool. Order is preserved and decides tie-breaks.
    pub fn with_angle_pool(mut self, pool: Vec<String>) -> Self {
        self.angle_pool = Arc::new(pool);
        self
    }

    pub fn angle_pool(&self) -> &[String] {
        &self.angle_pool
    }

    /// Canonicalize `title`, make it novel for `project_id` if possible and
    /// record the result
    pub async fn resolve(
        &self,
        project_id: &str,
        title: &str,
        max_attempts: usize,
    ) -> Result<UniquenessOutcome> {
        let form = canonicalize(title);
        debug!(project_id, canonical = %form, "Canonicalized topic");

        let pool = self.angle_pool.clone();
        let resolve_form = form.clone();
        let resolver: Resolver = Box::new(move |entries: &[String]| {
            resolve_against(&resolve_form, entries, &pool, max_attempts)
        });
        let outcome = self.memory.append_resolved(project_id, resolver).await?;

        info!(
            project_id,
            original = %form,
            canonical = %outcome.canonical,
            is_novel = outcome.is_novel,
            attempts = outcome.attempts,
            "Resolved topic uniqueness"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (UniquenessEngine, Arc<InMemoryVarietyMemory>) {
        let memory = Arc::new(InMemoryVarietyMemory::new());
        (UniquenessEngine::new(memory.clone()), memory)
    }

    #[tokio::test]
    async fn test_novel_title_is_recorded_unchanged() {
        let (engine, memory) = engine();
        let outcome = engine
            .resolve("blog", "Guide to React hooks", 20)
            .await
            .unwrap();

        assert!(outcome.is_novel);
        assert!(!outcome.mutated);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.canonical, "guide | react | hooks");
        assert_eq!(
            memory.entries("blog").await.unwrap(),
            vec!["guide | react | hooks".to_string()]
        );
    }

    #[tokio::test]
    async fn test_repeat_title_gets_new_angle() {
        let (engine, memory) = engine();
        engine.resolve("blog", "Guide to React hooks", 20).await.unwrap();
        let second = engine
            .resolve("blog", "React hooks: a guide", 20)
            .await
            .unwrap();

        assert!(second.is_novel);
        assert!(second.mutated);
        assert_eq!(second.angle, "beginners");
        assert_eq!(memory.entries("blog").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_is_project_scoped() {
        let (engine, _) = engine();
        engine.resolve("blog", "Guide to React hooks", 20).await.unwrap();
        let other = engine
            .resolve("docs", "Guide to React hooks", 20)
            .await
            .unwrap();
        assert!(other.is_novel);
        assert!(!other.mutated);
    }

    #[tokio::test]
    async fn test_non_novel_result_is_still_appended() {
        let memory = Arc::new(InMemoryVarietyMemory::new());
        let engine = UniquenessEngine::new(memory.clone())
            .with_angle_pool(vec!["hooks".to_string()]);

        engine.resolve("blog", "Guide to React hooks", 20).await.unwrap();
        let again = engine
            .resolve("blog", "Guide to React hooks", 20)
            .await
            .unwrap();

        assert!(!again.is_novel);
        assert_eq!(again.attempts, 0);
        assert_eq!(memory.entries("blog").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_choose_distinct_angles() {
        let memory = Arc::new(InMemoryVarietyMemory::new());
        let engine = Arc::new(UniquenessEngine::new(memory.clone()));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .resolve("blog", "Guide to React hooks", 20)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut lines = Vec::new();
        for handle in handles {
            lines.push(handle.await.unwrap().canonical);
        }
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_custom_pool_order_is_respected() {
        let memory = Arc::new(InMemoryVarietyMemory::new());
        memory
            .seed("blog", vec!["guide | react | hooks".to_string()])
            .await;
        let engine = UniquenessEngine::new(memory)
            .with_angle_pool(vec!["zeta".to_string(), "alpha".to_string()]);

        let outcome = engine
            .resolve("blog", "Guide to React hooks", 20)
            .await
            .unwrap();
        assert_eq!(outcome.angle, "zeta");
    }
}
