//! Error types for the Strata domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Generation errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Session errors ---
    #[error("Session '{session_id}' belongs to user '{owner}', not '{user_id}'")]
    SessionOwnership {
        session_id: String,
        owner: String,
        user_id: String,
    },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by an external model or embedding backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid embedding from {provider}: {reason}")]
    InvalidEmbedding { provider: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Memory item not found: {0}")]
    NotFound(String),

    #[error("Cannot promote {id}: {reason}")]
    PromotionRejected { id: String, reason: String },
}

/// Errors raised while assembling or optimizing a context window.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// Mandatory layers alone do not fit the configured budget.
    #[error(
        "Token budget infeasible: mandatory layers need at least {required} tokens, budget is {budget}"
    )]
    BudgetInfeasible { required: usize, budget: usize },

    #[error("Unknown layer id: {0} (expected 1..=11)")]
    UnknownLayer(u8),

    #[error("Context window invariant violated: {0}")]
    InvariantViolated(String),

    #[error("No context window has been assembled for session {0}")]
    NoWindow(String),
}

/// Errors surfaced to the caller when a reply could not be produced.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The generation backend failed; the caller should retry later.
    #[error("Generation backend unavailable ({provider}): {source}")]
    Unavailable {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("No provider registered for model '{0}'")]
    NoProvider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn budget_infeasible_mentions_both_sizes() {
        let err = Error::Context(ContextError::BudgetInfeasible {
            required: 120,
            budget: 50,
        });
        let msg = err.to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn generation_unavailable_keeps_provider_source() {
        let err = GenerationError::Unavailable {
            provider: "anthropic".into(),
            source: ProviderError::Network("connection refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("connection refused"));
    }
}
