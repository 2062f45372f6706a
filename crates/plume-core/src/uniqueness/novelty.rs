//! Jaccard overlap between canonical lines

use std::collections::HashSet;

/// Similarity at or above this means the lines cover the same ground
pub const OVERLAP_THRESHOLD: f64 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Novelty {
    Novel,
    Overlaps,
}

impl Novelty {
    pub fn is_novel(&self) -> bool {
        matches!(self, Novelty::Novel)
    }
}

pub fn token_set(line: &str) -> HashSet<&str> {
    line.split(|c: char| c.is_whitespace() || c == '|')
        .filter(|t| !t.is_empty())
        .collect()
}

/// |A ∩ B| / |A ∪ B|; two empty lines share nothing
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = token_set(a);
    let b = token_set(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

pub fn check_novelty<S: AsRef<str>>(candidate: &str, memory: &[S]) -> Novelty {
    let overlaps = memory
        .iter()
        .any(|entry| jaccard(candidate, entry.as_ref()) >= OVERLAP_THRESHOLD);
    if overlaps {
        Novelty::Overlaps
    } else {
        Novelty::Novel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_splits_on_pipes_and_spaces() {
        let tokens = token_set("guide | react |beginners  tutorial");
        assert_eq!(tokens.len(), 4);
        assert!(tokens.contains("beginners"));
        assert!(!tokens.contains("|"));
    }

    #[test]
    fn test_jaccard_values() {
        assert_eq!(jaccard("a | b | c", "a | b | c"), 1.0);
        assert_eq!(jaccard("a | b | c", "x | y | z"), 0.0);
        assert_eq!(jaccard("guide | react | beginners", "guide | react | tutorial"), 0.5);
        assert_eq!(jaccard("", ""), 0.0);
    }

    #[test]
    fn test_three_of_four_shared_tokens_overlap() {
        let memory = ["guide | react | beginners tutorial"];
        assert_eq!(
            check_novelty("guide | react | beginners", &memory),
            Novelty::Overlaps
        );
    }

    #[test]
    fn test_disjoint_lines_are_novel() {
        let memory = ["deploy | kubernetes | production"];
        assert_eq!(
            check_novelty("guide | react | beginners", &memory),
            Novelty::Novel
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // 13 shared of 20 distinct = 0.65 exactly
        let shared: Vec<String> = (0..13).map(|i| format!("s{}", i)).collect();
        let a = format!("{} a1 a2 a3 a4", shared.join(" "));
        let b = format!("{} b1 b2 b3", shared.join(" "));
        assert!((jaccard(&a, &b) - 0.65).abs() < f64::EPSILON);
        assert_eq!(check_novelty(&a, &[b]), Novelty::Overlaps);
    }

    #[test]
    fn test_empty_memory_is_novel() {
        let memory: [&str; 0] = [];
        assert!(check_novelty("guide | react | hooks", &memory).is_novel());
    }
}
