//! Embedding fallback chain with vector validation.
//!
//! Providers are tried in order, each under its own timeout. A response only
//! counts if every vector passes validation; an invalid response is treated
//! like any other provider failure and the next provider is tried.

use crate::hashing::HashingEmbedder;
use crate::router::ProviderRouter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strata_core::error::ProviderError;
use strata_core::provider::{Embedded, Embedder, EmbeddingRequest, Provider};
use tracing::{info, warn};

/// Adapts a generation provider's embeddings endpoint to [`Embedder`].
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn space(&self) -> String {
        format!("{}/{}", self.provider.name(), self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await?;
        Ok(response.embeddings)
    }
}

/// Check a batch of vectors: one per input, non-empty, finite, equal
/// dimensionality (matching `expected_dimensions` when set), and L2 norm
/// within `(0, max_magnitude]`.
pub fn validate_embeddings(
    provider: &str,
    inputs: usize,
    vectors: &[Vec<f32>],
    expected_dimensions: Option<usize>,
    max_magnitude: f32,
) -> Result<(), ProviderError> {
    let invalid = |reason: String| ProviderError::InvalidEmbedding {
        provider: provider.to_string(),
        reason,
    };

    if vectors.len() != inputs {
        return Err(invalid(format!("expected {inputs} vectors, got {}", vectors.len())));
    }

    let dims = expected_dimensions.or_else(|| vectors.first().map(Vec::len));
    for (i, v) in vectors.iter().enumerate() {
        if v.is_empty() {
            return Err(invalid(format!("vector {i} is empty")));
        }
        if Some(v.len()) != dims {
            return Err(invalid(format!(
                "vector {i} has {} dimensions, expected {}",
                v.len(),
                dims.unwrap_or_default()
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(invalid(format!("vector {i} contains non-finite values")));
        }
        let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if norm <= 0.0 || norm > max_magnitude as f64 {
            return Err(invalid(format!(
                "vector {i} has norm {norm:.4}, outside (0, {max_magnitude}]"
            )));
        }
    }
    Ok(())
}

/// A single entry in the embedding chain.
struct EmbedderEntry {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

/// An embedder that wraps an ordered list of embedders and falls back on
/// failure or invalid output.
pub struct FallbackEmbedder {
    name: String,
    chain: Vec<EmbedderEntry>,
    expected_dimensions: Option<usize>,
    max_magnitude: f32,
}

impl FallbackEmbedder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
            expected_dimensions: None,
            max_magnitude: 1_000.0,
        }
    }

    /// Add an embedder to the chain with a custom timeout.
    pub fn add(mut self, embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        self.chain.push(EmbedderEntry { embedder, timeout });
        self
    }

    /// Add an embedder with the default timeout (10s).
    pub fn add_default(self, embedder: Arc<dyn Embedder>) -> Self {
        self.add(embedder, Duration::from_secs(10))
    }

    /// Require every vector to have exactly this many dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.expected_dimensions = (dimensions > 0).then_some(dimensions);
        self
    }

    pub fn with_max_magnitude(mut self, max_magnitude: f32) -> Self {
        self.max_magnitude = max_magnitude;
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn space(&self) -> String {
        self.chain
            .first()
            .map_or_else(|| self.name.clone(), |entry| entry.embedder.space())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(self.embed_tagged(texts).await?.vectors)
    }

    async fn embed_tagged(&self, texts: &[String]) -> Result<Embedded, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No embedders in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.embedder.name().to_string();

            info!(
                provider = %provider_name,
                attempt = i + 1,
                total = self.chain.len(),
                count = texts.len(),
                "Embedding: trying provider"
            );

            let result = match tokio::time::timeout(entry.timeout, entry.embedder.embed_tagged(texts)).await {
                Ok(Ok(embedded)) => validate_embeddings(
                    &provider_name,
                    texts.len(),
                    &embedded.vectors,
                    self.expected_dimensions,
                    self.max_magnitude,
                )
                .map(|()| embedded),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Embedder '{}' timed out after {}ms",
                    provider_name,
                    entry.timeout.as_millis()
                ))),
            };

            match result {
                Ok(embedded) => {
                    if i > 0 {
                        warn!(
                            provider = %provider_name,
                            space = %embedded.space,
                            "Embedding answered by fallback; vectors are tagged with its space"
                        );
                    }
                    return Ok(embedded);
                }
                Err(e) => {
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Embedding: provider failed, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Build the configured embedding chain (primary, then secondary).
///
/// `"hashing"` names the built-in [`HashingEmbedder`]; any other name must be
/// a provider registered in the router. An empty chain falls back to hashing.
pub fn build_embedder_from_config(
    config: &strata_config::AppConfig,
    router: &ProviderRouter,
) -> FallbackEmbedder {
    let cfg = &config.embedding;
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    let dimensions = (cfg.dimensions > 0).then_some(cfg.dimensions);

    let mut chain = FallbackEmbedder::new("embedding")
        .with_dimensions(cfg.dimensions)
        .with_max_magnitude(cfg.max_magnitude);

    let secondary = cfg.secondary.iter().filter(|s| **s != cfg.primary);
    for name in std::iter::once(&cfg.primary).chain(secondary) {
        let embedder: Arc<dyn Embedder> = if name == "hashing" {
            Arc::new(HashingEmbedder::with_dimensions(
                dimensions.unwrap_or(crate::hashing::DEFAULT_DIMENSIONS),
            ))
        } else {
            match router.get(name) {
                Some(provider) => Arc::new(ProviderEmbedder::new(provider, &cfg.model)),
                None => {
                    warn!(provider = %name, "Embedding provider is not configured, skipping");
                    continue;
                }
            }
        };
        chain = chain.add(embedder, timeout);
    }

    if chain.is_empty() {
        chain = chain.add(
            Arc::new(HashingEmbedder::with_dimensions(
                dimensions.unwrap_or(crate::hashing::DEFAULT_DIMENSIONS),
            )),
            timeout,
        );
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns canned vectors and counts calls.
    struct ScriptedEmbedder {
        name: String,
        result: Result<Vec<Vec<f32>>, ProviderError>,
        calls: Mutex<usize>,
    }

    impl ScriptedEmbedder {
        fn ok(name: &str, vectors: Vec<Vec<f32>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                result: Ok(vectors),
                calls: Mutex::new(0),
            })
        }

        fn failing(name: &str, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                result: Err(error),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }
    }

    /// Never answers (for timeout testing).
    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn one() -> Vec<String> {
        vec!["hello".to_string()]
    }

    #[tokio::test]
    async fn primary_wins_when_valid() {
        let p1 = ScriptedEmbedder::ok("primary", vec![vec![0.6, 0.8]]);
        let p2 = ScriptedEmbedder::ok("secondary", vec![vec![1.0, 0.0]]);
        let chain = FallbackEmbedder::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        let vectors = chain.embed(&one()).await.unwrap();
        assert_eq!(vectors, vec![vec![0.6, 0.8]]);
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_on_provider_error() {
        let p1 = ScriptedEmbedder::failing("primary", ProviderError::RateLimited { retry_after_secs: 5 });
        let p2 = ScriptedEmbedder::ok("secondary", vec![vec![1.0, 0.0]]);
        let chain = FallbackEmbedder::new("test")
            .add_default(p1.clone())
            .add_default(p2.clone());

        assert!(chain.embed(&one()).await.is_ok());
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_vectors_trigger_fallback() {
        let p1 = ScriptedEmbedder::ok("primary", vec![vec![f32::NAN, 1.0]]);
        let p2 = ScriptedEmbedder::ok("secondary", vec![vec![0.0, 1.0]]);
        let chain = FallbackEmbedder::new("test").add_default(p1).add_default(p2.clone());

        assert_eq!(chain.embed(&one()).await.unwrap(), vec![vec![0.0, 1.0]]);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn all_invalid_returns_invalid_embedding() {
        let p1 = ScriptedEmbedder::ok("primary", vec![vec![0.0, 0.0]]);
        let chain = FallbackEmbedder::new("test").add_default(p1);
        let err = chain.embed(&one()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidEmbedding { .. }));
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let p2 = ScriptedEmbedder::ok("secondary", vec![vec![1.0]]);
        let chain = FallbackEmbedder::new("test")
            .add(Arc::new(HangingEmbedder), Duration::from_millis(50))
            .add_default(p2.clone());

        assert!(chain.embed(&one()).await.is_ok());
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_answer_carries_its_own_space() {
        let p1 = ScriptedEmbedder::failing("primary", ProviderError::Network("down".into()));
        let chain = FallbackEmbedder::new("test")
            .add_default(p1)
            .add_default(Arc::new(HashingEmbedder::with_dimensions(64)));

        assert_eq!(chain.space(), "primary");
        let embedded = chain.embed_tagged(&one()).await.unwrap();
        assert_eq!(embedded.space, "hashing/64");
        assert_eq!(embedded.vectors[0].len(), 64);
    }

    #[tokio::test]
    async fn empty_chain_returns_not_configured() {
        let chain = FallbackEmbedder::new("empty");
        assert!(matches!(
            chain.embed(&one()).await.unwrap_err(),
            ProviderError::NotConfigured(_)
        ));
    }

    #[test]
    fn validation_rules() {
        assert!(validate_embeddings("p", 1, &[vec![0.6, 0.8]], None, 1.0).is_ok());
        // count mismatch
        assert!(validate_embeddings("p", 2, &[vec![1.0]], None, 10.0).is_err());
        // empty vector
        assert!(validate_embeddings("p", 1, &[vec![]], None, 10.0).is_err());
        // inconsistent dimensions
        assert!(validate_embeddings("p", 2, &[vec![1.0], vec![1.0, 0.0]], None, 10.0).is_err());
        // configured dimensions
        assert!(validate_embeddings("p", 1, &[vec![1.0, 0.0]], Some(3), 10.0).is_err());
        // infinite
        assert!(validate_embeddings("p", 1, &[vec![f32::INFINITY]], None, 10.0).is_err());
        // magnitude too large
        assert!(validate_embeddings("p", 1, &[vec![3.0, 4.0]], None, 4.9).is_err());
    }

    #[test]
    fn default_config_builds_hashing_chain() {
        let config = strata_config::AppConfig::default();
        let router = crate::router::build_from_config(&config);
        let chain = build_embedder_from_config(&config, &router);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn secondary_defaults_to_hashing_behind_a_provider() {
        let mut config = strata_config::AppConfig::default();
        config.embedding.primary = "primary".into();
        let mut router = crate::router::build_from_config(&config);
        router.register(
            "primary",
            Arc::new(crate::openai_compat::OpenAiCompatProvider::new("primary", "http://127.0.0.1:9", "k")),
        );
        let chain = build_embedder_from_config(&config, &router);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.space(), "primary/text-embedding-3-small");
    }

    #[test]
    fn unknown_secondary_is_skipped() {
        let mut config = strata_config::AppConfig::default();
        config.embedding.secondary = Some("nowhere".into());
        let router = crate::router::build_from_config(&config);
        let chain = build_embedder_from_config(&config, &router);
        assert_eq!(chain.len(), 1);
    }
}
