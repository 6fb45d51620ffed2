//! Memory system implementations for Strata.
//!
//! Storage backends (in-memory, JSONL file), vector math, the retention
//! predicates, and [`TieredMemory`], which ties them together.

pub mod file_backend;
pub mod in_memory;
pub mod retention;
pub mod tiered;
pub mod vector;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;
pub use retention::{HeuristicRetention, RetentionPolicy};
pub use tiered::{
    content_hash, recency_score, ObserveOutcome, Observation, ScoredMemory, StoreDecision,
    TierSettings, TieredMemory,
};
pub use vector::{cosine_similarity, l2_norm, vector_search};
