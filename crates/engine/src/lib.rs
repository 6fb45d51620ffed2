//! The Strata context engine.
//!
//! Every turn runs the same pipeline:
//!
//! 1. **Assemble** an eleven-layer context window for the query, building the
//!    layers concurrently and compressing to the token budget
//! 2. **Generate** a reply through the provider chosen for the model
//! 3. **Commit** the turn: session ring buffer, tiered memory, layer snapshots
//!
//! [`ContextEngine`] wraps the pipeline behind per-session locks; the pieces
//! are usable on their own for hosts that drive the steps themselves.

pub mod context;
pub mod engine;
pub mod gateway;
pub mod knowledge;
pub mod snapshot;
pub mod state_updater;

pub use context::{
    BudgetCompressor, BuilderDeps, BuilderSet, CompressionReport, ContextAssembler, ContextLayer,
    ContextWindow, LayerBuilder, LayerData, LayerId, LayerStatus, RelevanceScorer,
};
pub use engine::{ContextEngine, TurnResult};
pub use gateway::{GenerationGateway, GenerationOptions, GenerationResult};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeChunk, KnowledgeRetriever};
pub use snapshot::{InMemorySnapshotStore, LayerSnapshot, SnapshotStore};
pub use state_updater::{CommitOutcome, StateUpdater};
