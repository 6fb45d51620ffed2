//! Relevance scoring for layers and windows.
//!
//! Each layer reports a relevance in [0,1] that depends only on its id and
//! whether it is active (memory is the exception: it reports the mean score
//! of the items it carries). The window's aggregate is a weighted mean over
//! all eleven layers, so inactive layers still pull the score down.

use crate::context::layer::{ContextLayer, LAYER_COUNT, LayerId, LayerStatus};
use strata_config::{LayerRelevanceConfig, ScoringWeights};

#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    relevance: LayerRelevanceConfig,
    weights: ScoringWeights,
}

impl RelevanceScorer {
    pub fn new(relevance: LayerRelevanceConfig, weights: ScoringWeights) -> Self {
        Self { relevance, weights }
    }

    pub fn from_config(config: &strata_config::ContextConfig) -> Self {
        Self::new(config.relevance.clone(), config.weights.clone())
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Relevance an active layer reports. For memory this is the floor.
    pub fn active_relevance(&self, id: LayerId) -> f32 {
        let r = &self.relevance;
        match id {
            LayerId::Instructions => r.instructions,
            LayerId::UserInfo => r.user_info,
            LayerId::Knowledge => r.knowledge_active,
            LayerId::TaskState => r.task_state,
            LayerId::Memory => r.memory_floor,
            LayerId::Tools => r.tools,
            LayerId::Examples => r.examples,
            LayerId::ConversationContext => r.conversation,
            LayerId::Constraints => r.constraints,
            LayerId::OutputFormat => r.output_format,
            LayerId::UserQuery => r.user_query,
        }
    }

    /// Relevance an inactive layer reports.
    pub fn inactive_relevance(&self, id: LayerId) -> f32 {
        match id {
            LayerId::Knowledge => self.relevance.knowledge_inactive,
            _ => 0.0,
        }
    }

    /// Memory layer relevance: mean of the item scores, floored.
    pub fn memory_relevance(&self, item_scores: &[f32]) -> f32 {
        let floor = self.relevance.memory_floor;
        if item_scores.is_empty() {
            return floor;
        }
        let mean = item_scores.iter().sum::<f32>() / item_scores.len() as f32;
        mean.max(floor).clamp(0.0, 1.0)
    }

    /// `sum(relevance * weight) / 11`, clamped to [0,1].
    pub fn aggregate(&self, layers: &[ContextLayer]) -> f32 {
        let sum: f32 = layers
            .iter()
            .map(|l| {
                let weight = match l.status {
                    LayerStatus::Active => self.weights.active,
                    LayerStatus::Inactive | LayerStatus::Processing => self.weights.inactive,
                };
                l.relevance_score * weight
            })
            .sum();
        (sum / LAYER_COUNT as f32).clamp(0.0, 1.0)
    }
}
