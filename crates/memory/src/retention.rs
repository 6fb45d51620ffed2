//! Retention predicates deciding which observations reach the medium and
//! long tiers.

use crate::vector::cosine_similarity;
use strata_core::memory::MemoryItem;

/// Words that mark an observation as file- or task-related.
const SIGNIFICANT_KEYWORDS: &[&str] = &[
    "file", "files", "upload", "uploaded", "attached", "attachment", "document", "pdf",
    "spreadsheet", "image", "task", "tasks", "todo", "deadline", "remind", "remember",
    "project", "plan",
];

/// Tags that make an observation significant regardless of content.
const SIGNIFICANT_TAGS: &[&str] = &["file", "task"];

/// Decides tier membership for new observations.
///
/// The long-tier decision is split in two so callers can skip the embedding
/// call entirely when the cheap checks already reject a candidate.
pub trait RetentionPolicy: Send + Sync {
    /// Whether an observation belongs in the medium tier.
    fn is_significant(&self, content: &str, tags: &[String]) -> bool;

    /// Checks that run before embedding: size and exact duplicates.
    fn is_long_candidate(&self, content: &str, content_hash: &str, existing_long: &[MemoryItem]) -> bool;

    /// Checks that need the candidate's embedding: near duplicates.
    fn is_redundant(&self, embedding: &[f32], existing_long: &[MemoryItem]) -> bool;

    /// Full persistence-worthy predicate.
    fn is_persistence_worthy(
        &self,
        content: &str,
        content_hash: &str,
        embedding: &[f32],
        existing_long: &[MemoryItem],
    ) -> bool {
        self.is_long_candidate(content, content_hash, existing_long)
            && !self.is_redundant(embedding, existing_long)
    }
}

/// Length, keyword and similarity thresholds.
#[derive(Debug, Clone)]
pub struct HeuristicRetention {
    pub significance_min_chars: usize,
    pub persistence_min_chars: usize,
    pub redundancy_threshold: f32,
}

impl Default for HeuristicRetention {
    fn default() -> Self {
        Self {
            significance_min_chars: 40,
            persistence_min_chars: 80,
            redundancy_threshold: 0.95,
        }
    }
}

impl RetentionPolicy for HeuristicRetention {
    fn is_significant(&self, content: &str, tags: &[String]) -> bool {
        let content = content.trim();
        if content.chars().count() >= self.significance_min_chars {
            return true;
        }
        if tags.iter().any(|t| SIGNIFICANT_TAGS.contains(&t.as_str())) {
            return true;
        }
        content
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| SIGNIFICANT_KEYWORDS.contains(&w.to_lowercase().as_str()))
    }

    fn is_long_candidate(&self, content: &str, content_hash: &str, existing_long: &[MemoryItem]) -> bool {
        content.trim().chars().count() >= self.persistence_min_chars
            && !existing_long.iter().any(|i| i.content_hash == content_hash)
    }

    fn is_redundant(&self, embedding: &[f32], existing_long: &[MemoryItem]) -> bool {
        existing_long.iter().any(|i| {
            i.embedding
                .as_deref()
                .is_some_and(|e| cosine_similarity(e, embedding) >= self.redundancy_threshold)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_core::memory::MemoryTier;

    fn long(hash: &str, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem {
            id: hash.into(),
            owner_id: "alice".into(),
            session_id: None,
            tier: MemoryTier::Long,
            content: "x".into(),
            content_hash: hash.into(),
            tags: vec![],
            embedding: Some(embedding),
            embedding_space: Some("test".into()),
            relevance_score: 0.0,
            access_count: 0,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn short_small_talk_is_not_significant() {
        let policy = HeuristicRetention::default();
        assert!(!policy.is_significant("hi there", &[]));
        assert!(!policy.is_significant("thanks!", &["turn".into()]));
    }

    #[test]
    fn significance_by_length_tag_or_keyword() {
        let policy = HeuristicRetention::default();
        assert!(policy.is_significant(&"a".repeat(40), &[]));
        assert!(policy.is_significant("ok", &["file".into()]));
        assert!(policy.is_significant("see the PDF", &[]));
        assert!(policy.is_significant("add a todo", &[]));
    }

    #[test]
    fn long_candidate_requires_length_and_new_hash() {
        let policy = HeuristicRetention::default();
        let content = "b".repeat(80);
        assert!(policy.is_long_candidate(&content, "h1", &[]));
        assert!(!policy.is_long_candidate("too short", "h1", &[]));
        assert!(!policy.is_long_candidate(&content, "h1", &[long("h1", vec![1.0])]));
    }

    #[test]
    fn near_duplicate_embedding_is_redundant() {
        let policy = HeuristicRetention::default();
        let existing = [long("h1", vec![1.0, 0.0])];
        assert!(policy.is_redundant(&[0.99, 0.01], &existing));
        assert!(!policy.is_redundant(&[0.0, 1.0], &existing));
        assert!(policy.is_persistence_worthy(&"c".repeat(90), "h2", &[0.0, 1.0], &existing));
    }
}
