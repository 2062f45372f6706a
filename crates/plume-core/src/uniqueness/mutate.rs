//! Angle substitution for colliding canonical forms

use super::canonical::CanonicalForm;
use super::novelty::check_novelty;

/// Alternative angles, tried in this order
pub const DEFAULT_ANGLE_POOL: [&str; 20] = [
    "beginners",
    "advanced techniques",
    "best practices",
    "common mistakes",
    "case study",
    "step by step",
    "performance",
    "security",
    "comparison",
    "cost",
    "troubleshooting",
    "checklist",
    "history",
    "future trends",
    "tools",
    "real world examples",
    "faq",
    "myths",
    "team workflow",
    "automation",
];

pub fn default_angle_pool() -> Vec<String> {
    DEFAULT_ANGLE_POOL.iter().map(|a| a.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub form: CanonicalForm,
    pub is_novel: bool,
    /// Candidates tried
    pub attempts: u32,
}

/// Hold intent and entity, walk the pool for an angle that clears memory.
///
/// Gives up after `min(max_attempts, candidates)` tries and hands back the
/// last candidate with `is_novel = false`. With nothing to try, the original
/// form comes back unchanged.
pub fn mutate<S: AsRef<str>>(
    form: &CanonicalForm,
    memory: &[S],
    pool: &[String],
    max_attempts: usize,
) -> Mutation {
    let candidates = pool.iter().filter(|angle| **angle != form.angle);

    let mut last = None;
    let mut attempts = 0;
    for angle in candidates.take(max_attempts) {
        attempts += 1;
        let candidate = form.with_angle(angle);
        if check_novelty(&candidate.line(), memory).is_novel() {
            return Mutation {
                form: candidate,
                is_novel: true,
                attempts,
            };
        }
        last = Some(candidate);
    }

    Mutation {
        form: last.unwrap_or_else(|| form.clone()),
        is_novel: false,
        attempts,
    }
}
