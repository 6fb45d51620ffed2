//! Memory types and the storage backend trait.
//!
//! Observations are kept in three retention tiers:
//! - **short**: recent turns, bounded ring buffer, expires after a fixed window
//! - **medium**: significant events, expires when the session ends
//! - **long**: persistence-worthy facts, embedded, evicted only by LRU cap
//!
//! The backend trait is the persistence boundary: it stores items keyed by
//! `(owner_id, tier, id)` and knows nothing about retention policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// Retention class of a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Short,
    Medium,
    Long,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 3] = [MemoryTier::Short, MemoryTier::Medium, MemoryTier::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            other => Err(format!("unknown memory tier '{other}'")),
        }
    }
}

/// A single durable observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique ID for this memory
    pub id: String,

    /// Owning user (memories outlive sessions)
    pub owner_id: String,

    /// Session that produced the observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Retention tier
    pub tier: MemoryTier,

    /// The content of the memory
    pub content: String,

    /// SHA-256 of the normalized content, used for deduplication
    #[serde(default)]
    pub content_hash: String,

    /// Tags for categorization ("turn", "file", "task", ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Embedding vector (always present on long items)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Space the embedding lives in; only same-space vectors are compared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_space: Option<String>,

    /// Relevance score (set by retrieval)
    #[serde(default)]
    pub relevance_score: f32,

    /// How many times retrieval returned this item
    #[serde(default)]
    pub access_count: u32,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// When this memory was last returned by retrieval
    pub last_accessed_at: DateTime<Utc>,

    /// Wall-clock expiry; `None` only for long items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Whether the item is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The storage backend trait.
///
/// Implementations: in-memory (tests, ephemeral sessions) and JSONL file.
/// `put` is an upsert keyed by `(owner_id, tier, id)`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Insert or replace an item.
    async fn put(&self, item: MemoryItem) -> std::result::Result<(), MemoryError>;

    /// Get an item by owner and ID.
    async fn get(&self, owner_id: &str, id: &str) -> std::result::Result<Option<MemoryItem>, MemoryError>;

    /// List an owner's items, optionally restricted to one tier, oldest first.
    async fn list(
        &self,
        owner_id: &str,
        tier: Option<MemoryTier>,
    ) -> std::result::Result<Vec<MemoryItem>, MemoryError>;

    /// Delete a batch of items by ID. Returns how many were removed.
    async fn delete(&self, owner_id: &str, ids: &[String]) -> std::result::Result<usize, MemoryError>;

    /// All owners with at least one stored item.
    async fn owners(&self) -> std::result::Result<Vec<String>, MemoryError>;

    /// Count an owner's items in a tier (`None` = all tiers).
    async fn count(
        &self,
        owner_id: &str,
        tier: Option<MemoryTier>,
    ) -> std::result::Result<usize, MemoryError> {
        Ok(self.list(owner_id, tier).await?.len())
    }
}
