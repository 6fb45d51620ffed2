//! Provider trait: the abstraction over model and embedding backends.
//!
//! A Provider knows how to send a rendered prompt to a language model and get
//! a response back, and optionally how to turn texts into embedding vectors.
//!
//! Implementations: OpenAI-compatible endpoints, Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The rendered prompt as a message list
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use for embeddings (e.g., "text-embedding-3-small").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,

    /// Token usage.
    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// Every model backend implements this trait. The generation gateway calls
/// `complete()` without knowing which backend family is answering.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(
            format!("Provider '{}' does not support embeddings", self.name()),
        ))
    }
}

/// A batch of vectors together with the space that produced them.
///
/// Vectors from different spaces are not comparable, even when their
/// dimensionality happens to match.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub space: String,
    pub vectors: Vec<Vec<f32>>,
}

/// Turns text into vectors. The memory tiers and the knowledge retriever
/// only ever see this trait, never a concrete backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The vector space this embedder writes into, e.g. `"openai/text-embedding-3-small"`.
    /// For a chain this is the preferred space, not necessarily the one the
    /// last call landed in.
    fn space(&self) -> String {
        self.name().to_string()
    }

    /// Embed a batch of texts; one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a batch and report which space answered.
    async fn embed_tagged(&self, texts: &[String]) -> std::result::Result<Embedded, ProviderError> {
        Ok(Embedded {
            space: self.space(),
            vectors: self.embed(texts).await?,
        })
    }

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::InvalidEmbedding {
            provider: self.name().to_string(),
            reason: "empty response".into(),
        })
    }

    /// Embed a single text and report which space answered.
    async fn embed_one_tagged(&self, text: &str) -> std::result::Result<(String, Vec<f32>), ProviderError> {
        let Embedded { space, mut vectors } = self.embed_tagged(&[text.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| ProviderError::InvalidEmbedding {
            provider: self.name().to_string(),
            reason: "empty response".into(),
        })?;
        Ok((space, vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChatOnly;

    #[async_trait]
    impl Provider for ChatOnly {
        fn name(&self) -> &str {
            "chat_only"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant("hi"),
                usage: None,
                model: "m".into(),
                metadata: serde_json::Map::new(),
            })
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model":"gpt-4o","messages":[]}"#).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.top_p.is_none());
        assert!(req.max_tokens.is_none());
    }

    #[tokio::test]
    async fn embed_defaults_to_not_configured() {
        let err = ChatOnly
            .embed(EmbeddingRequest {
                model: "x".into(),
                inputs: vec!["a".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    struct Fixed;

    #[async_trait]
    impl Embedder for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn tagged_embedding_reports_space() {
        let (space, vector) = Fixed.embed_one_tagged("x").await.unwrap();
        assert_eq!(space, "fixed");
        assert_eq!(vector, vec![1.0, 0.0]);
    }
}
