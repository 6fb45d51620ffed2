//! Generation fallback: ordered retry chain with per-provider timeouts.
//!
//! Generation never falls back implicitly; the gateway only builds one of
//! these when `generation.allow_fallback` is set.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strata_core::error::ProviderError;
use strata_core::provider::*;
use tracing::{info, warn};

/// A provider that wraps an ordered list of `(provider, model)` pairs and
/// falls back on failure.
pub struct FallbackProvider {
    name: String,
    chain: Vec<FallbackEntry>,
}

struct FallbackEntry {
    provider: Arc<dyn Provider>,
    /// Overrides the request model (different vendors name models differently)
    model: Option<String>,
    timeout: Duration,
}

impl FallbackProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Add a provider that serves the request's own model.
    pub fn add(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            model: None,
            timeout,
        });
        self
    }

    /// Add a provider that serves `model` instead of the requested one.
    pub fn add_with_model(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.chain.push(FallbackEntry {
            provider,
            model: Some(model.into()),
            timeout,
        });
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
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut last_error = ProviderError::NotConfigured("No providers in fallback chain".into());

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();
            let mut attempt = request.clone();
            if let Some(model) = &entry.model {
                attempt.model = model.clone();
            }

            info!(
                provider = %provider_name,
                model = %attempt.model,
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );

            match tokio::time::timeout(entry.timeout, entry.provider.complete(attempt)).await {
                Ok(Ok(mut response)) => {
                    response
                        .metadata
                        .insert("provider".into(), serde_json::json!(provider_name));
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider_name, error = %e, "Fallback: provider failed, trying next");
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Fallback: provider timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use strata_core::message::Message;

    /// Fails with a fixed error, or answers with the model it was asked for.
    struct MockProvider {
        name: String,
        error: Option<ProviderError>,
        seen_models: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                error: None,
                seen_models: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &str, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                error: Some(error),
                seen_models: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen_models.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            self.seen_models.lock().unwrap().push(request.model.clone());
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(ProviderResponse {
                    message: Message::assistant("success"),
                    usage: None,
                    model: request.model,
                    metadata: serde_json::Map::new(),
                }),
            }
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Timeout("unreachable".into()))
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4".into(),
            messages: vec![Message::user("hello")],
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
            stop: vec![],
        }
    }

    #[tokio::test]
    async fn first_provider_succeeds() {
        let p1 = MockProvider::ok("primary");
        let p2 = MockProvider::ok("secondary");
        let fallback = FallbackProvider::new("test")
            .add(p1.clone(), Duration::from_secs(5))
            .add(p2.clone(), Duration::from_secs(5));

        let response = fallback.complete(test_request()).await.unwrap();
        assert_eq!(response.metadata["provider"], "primary");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_swaps_model() {
        let p1 = MockProvider::failing("anthropic", ProviderError::Network("refused".into()));
        let p2 = MockProvider::ok("openai");
        let fallback = FallbackProvider::new("test")
            .add(p1.clone(), Duration::from_secs(5))
            .add_with_model(p2.clone(), "gpt-4o", Duration::from_secs(5));

        let response = fallback.complete(test_request()).await.unwrap();
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.metadata["provider"], "openai");
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test]
    async fn all_providers_fail_returns_last_error() {
        let p1 = MockProvider::failing("a", ProviderError::Network("conn refused".into()));
        let p2 = MockProvider::failing("b", ProviderError::AuthenticationFailed("bad key".into()));
        let fallback = FallbackProvider::new("test")
            .add(p1, Duration::from_secs(5))
            .add(p2, Duration::from_secs(5));

        match fallback.complete(test_request()).await.unwrap_err() {
            ProviderError::AuthenticationFailed(_) => {}
            other => panic!("Expected AuthenticationFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let p2 = MockProvider::ok("secondary");
        let fallback = FallbackProvider::new("test")
            .add(Arc::new(HangingProvider), Duration::from_millis(50))
            .add(p2.clone(), Duration::from_secs(5));

        assert!(fallback.complete(test_request()).await.is_ok());
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn empty_chain_returns_not_configured() {
        let fallback = FallbackProvider::new("empty");
        assert!(fallback.is_empty());
        assert!(matches!(
            fallback.complete(test_request()).await.unwrap_err(),
            ProviderError::NotConfigured(_)
        ));
    }
}
