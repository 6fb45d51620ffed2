//! Context assembly pipeline: the core architectural component.
//!
//! 1. Dispatch all eleven builders concurrently; builders that call external
//!    services run under a per-call timeout.
//! 2. Collect the layers in id order regardless of completion order.
//! 3. Score the window and count its tokens.
//! 4. Compress to the budget if needed, then re-validate.
//!
//! A builder that errors or times out never fails the assembly: its layer
//! degrades to `inactive` with an empty payload, a warning is logged and a
//! `LayerDegraded` event published. The only assembly error is a budget the
//! mandatory layers cannot fit.
//!
//! # Determinism
//!
//! Given identical session state, query and collaborator contents, two
//! assemblies produce the same layer statuses and token counts.

use crate::context::builders::{BuildInput, BuilderSet, LayerBuilder};
use crate::context::compressor::BudgetCompressor;
use crate::context::layer::{ContextLayer, ContextWindow, LayerId, LayerStatus};
use crate::context::scorer::RelevanceScorer;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use strata_core::error::ContextError;
use strata_core::event::{DomainEvent, EventBus};
use strata_core::session::{Attachment, Session};
use tracing::{debug, info, warn};

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Holds no per-session state; share one per engine.
pub struct ContextAssembler {
    builders: BuilderSet,
    scorer: RelevanceScorer,
    compressor: BudgetCompressor,
    budget: usize,
    builder_timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ContextAssembler {
    pub fn new(builders: BuilderSet, config: &strata_config::ContextConfig) -> Self {
        let scorer = RelevanceScorer::from_config(config);
        Self {
            builders,
            compressor: BudgetCompressor::new(scorer.clone()),
            scorer,
            budget: config.token_budget,
            builder_timeout: Duration::from_millis(config.builder_timeout_ms),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_compressor(mut self, compressor: BudgetCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn scorer(&self) -> &RelevanceScorer {
        &self.scorer
    }

    pub fn compressor(&self) -> &BudgetCompressor {
        &self.compressor
    }

    /// Build a context window for one turn.
    pub async fn assemble(
        &self,
        session: &Session,
        query: &str,
        attachments: &[Attachment],
    ) -> Result<ContextWindow, ContextError> {
        self.assemble_with_budget(session, query, attachments, self.budget)
            .await
    }

    /// Like [`assemble`](Self::assemble) with an explicit budget.
    pub async fn assemble_with_budget(
        &self,
        session: &Session,
        query: &str,
        attachments: &[Attachment],
        budget: usize,
    ) -> Result<ContextWindow, ContextError> {
        let input = BuildInput::new(session, query, attachments);

        // join_all yields in input order, which is layer order
        let layers: Vec<ContextLayer> = join_all(
            self.builders
                .iter()
                .map(|b| self.run_builder(b.as_ref(), &input)),
        )
        .await;

        let mut window = ContextWindow::new(&session.session_id, layers, budget);
        window.relevance_score = self.scorer.aggregate(&window.layers);
        debug!(
            session_id = %session.session_id,
            tokens = window.total_tokens,
            active = window.active_layer_ids.len(),
            "Layers built"
        );

        if window.is_over_budget() {
            self.compressor.compress(&mut window, budget, &[])?;
        }
        window.validate()?;

        info!(
            session_id = %session.session_id,
            tokens = window.total_tokens,
            budget,
            active = window.active_layer_ids.len(),
            relevance = window.relevance_score,
            "Context window assembled"
        );
        self.publish(DomainEvent::ContextAssembled {
            session_id: session.session_id.clone(),
            total_tokens: window.total_tokens,
            active_layers: window.active_layer_ids.len(),
            relevance: window.relevance_score,
            compressed: window.compression.is_some(),
            timestamp: Utc::now(),
        });
        Ok(window)
    }

    async fn run_builder(&self, builder: &dyn LayerBuilder, input: &BuildInput<'_>) -> ContextLayer {
        let id = builder.layer();
        let outcome = if builder.is_external() {
            match tokio::time::timeout(self.builder_timeout, builder.build(input)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "timed out after {}ms",
                    self.builder_timeout.as_millis()
                )),
            }
        } else {
            builder.build(input).await.map_err(|e| e.to_string())
        };

        match outcome {
            Ok(layer) if layer.id == id && layer.status != LayerStatus::Processing => layer,
            Ok(layer) => self.degrade(
                id,
                &input.session.session_id,
                format!("builder returned layer {} in state {:?}", layer.id, layer.status),
            ),
            Err(reason) => self.degrade(id, &input.session.session_id, reason),
        }
    }

    fn degrade(&self, id: LayerId, session_id: &str, reason: String) -> ContextLayer {
        warn!(session_id, layer = id.name(), reason = %reason, "Layer builder degraded");
        self.publish(DomainEvent::LayerDegraded {
            session_id: session_id.to_string(),
            layer: id.name().to_string(),
            reason,
            timestamp: Utc::now(),
        });
        ContextLayer::inactive(id, self.scorer.inactive_relevance(id))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
