//! Layered context assembly.
//!
//! A context window is always exactly eleven layers, in id order:
//!
//! | Id | Layer | Mandatory |
//! |----|-------|-----------|
//! | 1 | Instructions | yes |
//! | 2 | User info | |
//! | 3 | Knowledge | |
//! | 4 | Task state | |
//! | 5 | Memory | |
//! | 6 | Tools | |
//! | 7 | Examples | |
//! | 8 | Conversation | |
//! | 9 | Constraints | yes |
//! | 10 | Output format | |
//! | 11 | User query | yes |
//!
//! Builders fill the layers concurrently, the scorer weighs them and the
//! compressor fits the window to its token budget.

pub mod assembler;
pub mod builders;
pub mod compressor;
pub mod layer;
pub mod scorer;
pub mod token;

pub use assembler::ContextAssembler;
pub use builders::{BuildInput, BuilderDeps, BuilderSet, LayerBuilder};
pub use compressor::{BudgetCompressor, CompressionReport, RuleBasedSummarizer, Summarizer};
pub use layer::{ContextLayer, ContextWindow, LAYER_COUNT, LayerData, LayerId, LayerStatus};
pub use scorer::RelevanceScorer;
