//! Layer builders: one per context section.
//!
//! Every builder is a pure function of its input and its read-only
//! collaborators. Missing optional data never fails a build; the layer comes
//! back `inactive` with an empty payload instead.
//!
//! | Id | Builder | Source |
//! |----|---------|--------|
//! | 1 | [`InstructionsBuilder`] | config |
//! | 2 | [`UserInfoBuilder`] | session profile / preferences |
//! | 3 | [`KnowledgeBuilder`] | attachments + knowledge retriever |
//! | 4 | [`TaskStateBuilder`] | session tasks |
//! | 5 | [`MemoryBuilder`] | tiered memory |
//! | 6 | [`ToolsBuilder`] | tool catalog |
//! | 7 | [`ExamplesBuilder`] | example catalog |
//! | 8 | [`ConversationBuilder`] | session ring buffer |
//! | 9 | [`ConstraintsBuilder`] | config + session rules |
//! | 10 | [`OutputFormatBuilder`] | session preference / query cues |
//! | 11 | [`UserQueryBuilder`] | the query |

pub mod catalog;
pub mod query;
pub mod retrieval;
pub mod session_layers;
pub mod static_layers;

pub use catalog::{Example, ExampleCatalog, ExamplesBuilder, ToolsBuilder};
pub use query::{Complexity, Intent, OutputFormatBuilder, QueryAnalysis, ResponseType, UserQueryBuilder};
pub use retrieval::{KnowledgeBuilder, MemoryBuilder};
pub use session_layers::{ConversationBuilder, TaskStateBuilder, UserInfoBuilder};
pub use static_layers::{ConstraintsBuilder, InstructionsBuilder};

use crate::context::layer::{ContextLayer, LAYER_COUNT, LayerId};
use crate::context::scorer::RelevanceScorer;
use crate::knowledge::KnowledgeRetriever;
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::error::ContextError;
use strata_core::session::{Attachment, Session};
use strata_core::tool::ToolCatalog;
use strata_memory::TieredMemory;

/// Everything a builder may look at for one assembly.
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub session: &'a Session,
    pub query: &'a str,
    /// Attachments sent with this turn
    pub attachments: &'a [Attachment],
}

impl<'a> BuildInput<'a> {
    pub fn new(session: &'a Session, query: &'a str, attachments: &'a [Attachment]) -> Self {
        Self {
            session,
            query,
            attachments,
        }
    }

    /// Session attachments followed by this turn's, each id once.
    pub fn all_attachments(&self) -> Vec<&'a Attachment> {
        let mut out: Vec<&Attachment> = Vec::new();
        for a in self.session.attachments.iter().chain(self.attachments) {
            if !out.iter().any(|seen| seen.id == a.id) {
                out.push(a);
            }
        }
        out
    }
}

/// Builds one layer of the context window.
#[async_trait]
pub trait LayerBuilder: Send + Sync {
    /// The layer this builder produces.
    fn layer(&self) -> LayerId;

    /// Whether the build calls out to another service and must be bounded
    /// by the assembler's per-call timeout.
    fn is_external(&self) -> bool {
        false
    }

    async fn build(&self, input: &BuildInput<'_>) -> strata_core::Result<ContextLayer>;
}

/// Read-only collaborators of the standard builders.
pub struct BuilderDeps {
    pub config: strata_config::ContextConfig,
    pub memory: Arc<TieredMemory>,
    pub knowledge: Option<Arc<dyn KnowledgeRetriever>>,
    pub tools: Arc<ToolCatalog>,
    pub examples: Arc<ExampleCatalog>,
}

/// Exactly one builder per layer, held in layer order.
#[derive(Clone)]
pub struct BuilderSet {
    builders: Vec<Arc<dyn LayerBuilder>>,
}

impl BuilderSet {
    /// Accepts builders in any order; each layer must be covered once.
    pub fn new(mut builders: Vec<Arc<dyn LayerBuilder>>) -> Result<Self, ContextError> {
        builders.sort_by_key(|b| b.layer());
        let ids: Vec<LayerId> = builders.iter().map(|b| b.layer()).collect();
        if ids != LayerId::ALL {
            return Err(ContextError::InvariantViolated(format!(
                "expected one builder per layer, got {}",
                ids.iter().map(|id| id.number().to_string()).collect::<Vec<_>>().join(",")
            )));
        }
        Ok(Self { builders })
    }

    /// The eleven standard builders wired to their collaborators.
    pub fn standard(deps: BuilderDeps) -> Self {
        let scorer = RelevanceScorer::from_config(&deps.config);
        let cfg = &deps.config;
        let builders: Vec<Arc<dyn LayerBuilder>> = vec![
            Arc::new(InstructionsBuilder::new(
                cfg.instructions.clone(),
                cfg.guidelines.clone(),
                scorer.clone(),
            )),
            Arc::new(UserInfoBuilder::new(scorer.clone())),
            Arc::new(KnowledgeBuilder::new(deps.knowledge.clone(), cfg, scorer.clone())),
            Arc::new(TaskStateBuilder::new(scorer.clone())),
            Arc::new(MemoryBuilder::new(
                deps.memory.clone(),
                cfg.retrieval_limit,
                scorer.clone(),
            )),
            Arc::new(ToolsBuilder::new(deps.tools.clone(), scorer.clone())),
            Arc::new(ExamplesBuilder::new(deps.examples.clone(), scorer.clone())),
            Arc::new(ConversationBuilder::new(scorer.clone())),
            Arc::new(ConstraintsBuilder::new(cfg.default_constraints.clone(), scorer.clone())),
            Arc::new(OutputFormatBuilder::new(scorer.clone())),
            Arc::new(UserQueryBuilder::new(scorer)),
        ];
        debug_assert_eq!(builders.len(), LAYER_COUNT);
        Self { builders }
    }

    /// Swap in a different builder for its layer.
    pub fn replace(&mut self, builder: Arc<dyn LayerBuilder>) {
        let idx = usize::from(builder.layer().number()) - 1;
        self.builders[idx] = builder;
    }

    pub fn get(&self, id: LayerId) -> &Arc<dyn LayerBuilder> {
        &self.builders[usize::from(id.number()) - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn LayerBuilder>> {
        self.builders.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_memory::{InMemoryBackend, TierSettings};
    use strata_providers::HashingEmbedder;

    fn deps() -> BuilderDeps {
        BuilderDeps {
            config: strata_config::ContextConfig::default(),
            memory: Arc::new(TieredMemory::new(
                Arc::new(InMemoryBackend::new()),
                Arc::new(HashingEmbedder::new()),
                TierSettings::default(),
            )),
            knowledge: None,
            tools: Arc::new(ToolCatalog::builtin()),
            examples: Arc::new(ExampleCatalog::builtin()),
        }
    }

    #[test]
    fn standard_set_covers_every_layer_in_order() {
        let set = BuilderSet::standard(deps());
        let ids: Vec<LayerId> = set.iter().map(|b| b.layer()).collect();
        assert_eq!(ids, LayerId::ALL);
        assert!(set.get(LayerId::Knowledge).is_external());
        assert!(set.get(LayerId::Memory).is_external());
        assert!(!set.get(LayerId::Tools).is_external());
    }

    #[test]
    fn new_rejects_gaps_and_duplicates() {
        let set = BuilderSet::standard(deps());
        let mut builders: Vec<Arc<dyn LayerBuilder>> = set.iter().cloned().collect();
        builders.reverse();
        assert!(BuilderSet::new(builders.clone()).is_ok());

        builders.pop();
        assert!(BuilderSet::new(builders.clone()).is_err());

        builders.push(set.get(LayerId::Tools).clone());
        assert!(BuilderSet::new(builders).is_err());
    }

    #[test]
    fn attachments_dedupe_by_id() {
        let mut session = Session::new("u", "s");
        let a = Attachment::new("a.txt", "alpha");
        session.attachments.push(a.clone());
        let turn = vec![a, Attachment::new("b.txt", "beta")];
        let input = BuildInput::new(&session, "q", &turn);
        let names: Vec<&str> = input.all_attachments().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
