//! Generation gateway: renders a context window and calls the model.
//!
//! The window becomes a message list:
//!
//! - one system message holding every active layer 1–10 (except the
//!   conversation) as a `## Title` section,
//! - the conversation turns as their own messages,
//! - the user query as the final user message.
//!
//! The backend is picked by the [`ProviderRouter`] from the model name and
//! each call is bounded by `generation.timeout_secs`. Falling back to a
//! second provider only happens when `generation.allow_fallback` is set.

use crate::context::layer::{ContextWindow, LAYER_COUNT, LayerData, LayerId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_config::{AppConfig, ConfidenceConfig, GenerationConfig};
use strata_core::error::{GenerationError, ProviderError};
use strata_core::event::{DomainEvent, EventBus};
use strata_core::message::{Message, Role};
use strata_core::provider::{Provider, ProviderRequest, Usage};
use strata_providers::{FallbackProvider, ProviderRouter};
use tracing::{debug, info, warn};

/// Layers whose presence means the answer is grounded in something beyond
/// the fixed instructions.
const SUPPORTING_LAYERS: [LayerId; 5] = [
    LayerId::UserInfo,
    LayerId::Knowledge,
    LayerId::TaskState,
    LayerId::Memory,
    LayerId::ConversationContext,
];

/// Sampling parameters for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            top_p: Some(config.default_top_p),
            max_tokens: Some(config.default_max_tokens),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// A generated reply and how much to trust it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub usage: Option<Usage>,
    /// Heuristic in [0, 1]
    pub confidence: f32,
    pub latency_ms: u64,
    /// Model that actually answered
    pub model: String,
    pub provider: String,
    /// False when no supporting layer carried anything, i.e. the model
    /// answered generically.
    pub context_available: bool,
}

pub struct GenerationGateway {
    router: Arc<ProviderRouter>,
    config: GenerationConfig,
    events: Option<Arc<EventBus>>,
}

impl GenerationGateway {
    pub fn new(router: Arc<ProviderRouter>, config: GenerationConfig) -> Self {
        Self {
            router,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Render `window` into the message list sent to the model.
    pub fn render(window: &ContextWindow) -> Vec<Message> {
        let sections: Vec<String> = window
            .layers
            .iter()
            .filter(|l| l.is_active())
            .filter(|l| !matches!(l.id, LayerId::ConversationContext | LayerId::UserQuery))
            .filter_map(|l| {
                let body = l.data.render();
                (!body.is_empty()).then(|| format!("## {}\n{}", l.id.title(), body))
            })
            .collect();

        let mut messages = Vec::new();
        if !sections.is_empty() {
            messages.push(Message::system(sections.join("\n\n")));
        }

        if let Some(layer) = window.layer(LayerId::ConversationContext) {
            if let (true, LayerData::ConversationContext(conv)) = (layer.is_active(), &layer.data) {
                messages.extend(conv.turns.iter().map(|t| match t.role {
                    Role::User => Message::user(&t.content),
                    Role::Assistant => Message::assistant(&t.content),
                    Role::System => Message::system(&t.content),
                }));
            }
        }

        let query = match window.layer(LayerId::UserQuery).map(|l| &l.data) {
            Some(LayerData::UserQuery(q)) => q.text.clone(),
            _ => String::new(),
        };
        messages.push(Message::user(query));
        messages
    }

    /// Whether any supporting layer contributed content.
    pub fn context_available(window: &ContextWindow) -> bool {
        SUPPORTING_LAYERS.iter().any(|id| {
            window
                .layer(*id)
                .is_some_and(|l| l.is_active() && l.token_count > 0)
        })
    }

    /// Additive confidence, clamped to [0, 1].
    pub fn confidence(&self, window: &ContextWindow, text: &str, model: &str) -> f32 {
        score_confidence(&self.config.confidence, window, text, model)
    }

    /// Render, call the routed backend and score the reply.
    pub async fn generate(
        &self,
        window: &ContextWindow,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, GenerationError> {
        let (provider_name, provider, model) = self
            .router
            .resolve(&options.model)
            .ok_or_else(|| GenerationError::NoProvider(options.model.clone()))?;

        let request = ProviderRequest {
            model,
            messages: Self::render(window),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: Vec::new(),
        };
        debug!(
            session_id = %window.session_id,
            provider = %provider_name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending generation request"
        );

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();
        let outcome = match self.fallback_chain(&provider_name, &provider, timeout) {
            Some(chain) => chain.complete(request).await,
            None => match tokio::time::timeout(timeout, provider.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Provider '{provider_name}' timed out after {}s",
                    timeout.as_secs()
                ))),
            },
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let response = outcome.map_err(|source| {
            warn!(provider = %provider_name, error = %source, "Generation failed");
            GenerationError::Unavailable {
                provider: provider_name.clone(),
                source,
            }
        })?;

        // The fallback chain reports which member answered
        let answered_by = response
            .metadata
            .get("provider")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(provider_name);

        let text = response.message.content;
        let result = GenerationResult {
            confidence: self.confidence(window, &text, &response.model),
            context_available: Self::context_available(window),
            usage: response.usage,
            latency_ms,
            model: response.model,
            provider: answered_by,
            text,
        };

        info!(
            session_id = %window.session_id,
            provider = %result.provider,
            model = %result.model,
            latency_ms,
            confidence = result.confidence,
            "Response generated"
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ResponseGenerated {
                session_id: window.session_id.clone(),
                model: result.model.clone(),
                provider: result.provider.clone(),
                tokens_used: result.usage.map(|u| u.total_tokens).unwrap_or(0),
                latency_ms,
                timestamp: Utc::now(),
            });
        }
        Ok(result)
    }

    fn fallback_chain(
        &self,
        primary_name: &str,
        primary: &Arc<dyn Provider>,
        timeout: Duration,
    ) -> Option<FallbackProvider> {
        if !self.config.allow_fallback {
            return None;
        }
        let name = self.config.fallback_provider.as_deref()?;
        if name == primary_name {
            return None;
        }
        let Some(secondary) = self.router.get(name) else {
            warn!(fallback = name, "Configured fallback provider is not registered");
            return None;
        };
        Some(
            FallbackProvider::new(format!("{primary_name}+{name}"))
                .add(primary.clone(), timeout)
                .add(secondary, timeout),
        )
    }
}

fn score_confidence(cfg: &ConfidenceConfig, window: &ContextWindow, text: &str, model: &str) -> f32 {
    let active = window.active_layer_ids.len() as f32 / LAYER_COUNT as f32;
    let mut score = cfg.base
        + cfg.relevance_weight * window.relevance_score
        + cfg.active_weight * active;
    if text.chars().count() >= cfg.length_threshold_chars {
        score += cfg.length_bonus;
    }
    let bare_model = model.rsplit('/').next().unwrap_or(model);
    if cfg
        .premium_prefixes
        .iter()
        .any(|p| bare_model.starts_with(p.as_str()))
    {
        score += cfg.premium_model_bonus;
    }
    score.clamp(0.0, 1.0)
}
