//! Provider router: selects the generation backend for a model name.
//!
//! Resolution order for a model string:
//! 1. `provider/model` where `provider` is registered → that provider, bare model
//! 2. a known family prefix (`gpt-`, `o1`, `o3`, `claude-`, ...) whose
//!    provider is registered → that provider
//! 3. the default provider

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::provider::Provider;
use tracing::debug;

/// Model-name prefixes and the provider family that serves them.
const FAMILIES: &[(&str, &str)] = &[
    ("gpt-", "openai"),
    ("chatgpt-", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("o4", "openai"),
    ("text-embedding-", "openai"),
    ("claude-", "anthropic"),
];

/// The provider family a model name belongs to, if it is a known one.
pub fn family_of(model: &str) -> Option<&'static str> {
    FAMILIES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, family)| *family)
}

/// Routes requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a model string to `(provider name, provider, model)`.
    pub fn resolve(&self, model: &str) -> Option<(String, Arc<dyn Provider>, String)> {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(provider) = self.providers.get(prefix) {
                return Some((prefix.to_string(), provider.clone(), rest.to_string()));
            }
        }

        if let Some(family) = family_of(model) {
            if let Some(provider) = self.providers.get(family) {
                debug!(model, provider = family, "Resolved provider by model family");
                return Some((family.to_string(), provider.clone(), model.to_string()));
            }
        }

        self.default_provider()
            .map(|p| (self.default_provider.clone(), p, model.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &strata_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        router.register(
            name.clone(),
            build_provider(name, &api_key, provider_config.api_url.as_deref()),
        );
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        router.register(
            config.default_provider.clone(),
            build_provider(&config.default_provider, &api_key, None),
        );
    }

    router
}

fn build_provider(name: &str, api_key: &str, api_url: Option<&str>) -> Arc<dyn Provider> {
    if name == "anthropic" {
        let mut p = AnthropicProvider::new(api_key);
        if let Some(url) = api_url {
            p = p.with_base_url(url);
        }
        Arc::new(p)
    } else {
        let base_url = api_url
            .map(str::to_string)
            .unwrap_or_else(|| default_base_url(name));
        Arc::new(OpenAiCompatProvider::new(name, base_url, api_key))
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "anthropic" => "https://api.anthropic.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ProviderRouter {
        let mut router = ProviderRouter::new("anthropic");
        router.register("anthropic", Arc::new(AnthropicProvider::new("k")));
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("k")));
        router.register("ollama", Arc::new(OpenAiCompatProvider::ollama(None)));
        router
    }

    #[test]
    fn family_prefixes() {
        assert_eq!(family_of("gpt-4o"), Some("openai"));
        assert_eq!(family_of("o3-mini"), Some("openai"));
        assert_eq!(family_of("claude-sonnet-4"), Some("anthropic"));
        assert_eq!(family_of("llama3.1"), None);
    }

    #[test]
    fn resolves_by_family() {
        let (name, _, model) = router().resolve("gpt-4o-mini").unwrap();
        assert_eq!(name, "openai");
        assert_eq!(model, "gpt-4o-mini");
    }

    #[test]
    fn explicit_prefix_wins_and_is_stripped() {
        let (name, _, model) = router().resolve("ollama/llama3.1").unwrap();
        assert_eq!(name, "ollama");
        assert_eq!(model, "llama3.1");
    }

    #[test]
    fn unknown_model_uses_default() {
        let (name, _, model) = router().resolve("mistral-large").unwrap();
        assert_eq!(name, "anthropic");
        assert_eq!(model, "mistral-large");
    }

    #[test]
    fn family_without_registered_provider_uses_default() {
        let mut router = ProviderRouter::new("ollama");
        router.register("ollama", Arc::new(OpenAiCompatProvider::ollama(None)));
        let (name, _, _) = router.resolve("claude-opus-4").unwrap();
        assert_eq!(name, "ollama");
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = strata_config::AppConfig::default();
        let router = build_from_config(&config);
        assert!(router.default_provider().is_some());
        assert_eq!(router.list(), vec!["anthropic"]);
    }
}
