//! Generation and embedding backends for Strata.
//!
//! Generation providers implement `strata_core::Provider`; the router picks
//! one per model name. Embedders implement `strata_core::Embedder`; the
//! fallback chain validates every vector before handing it on.

pub mod anthropic;
pub mod embedding;
pub mod fallback;
pub mod hashing;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use embedding::{
    build_embedder_from_config, validate_embeddings, FallbackEmbedder, ProviderEmbedder,
};
pub use fallback::FallbackProvider;
pub use hashing::HashingEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, family_of, ProviderRouter};
