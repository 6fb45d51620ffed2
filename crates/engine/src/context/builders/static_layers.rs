//! Configuration-driven layers: instructions (1) and constraints (9).
//! Both are always active.

use super::{BuildInput, LayerBuilder};
use crate::context::layer::{ConstraintsData, ContextLayer, InstructionsData, LayerData, LayerId};
use crate::context::scorer::RelevanceScorer;
use async_trait::async_trait;
use strata_core::Result;

pub struct InstructionsBuilder {
    system_prompt: String,
    guidelines: Vec<String>,
    scorer: RelevanceScorer,
}

impl InstructionsBuilder {
    pub fn new(
        system_prompt: impl Into<String>,
        guidelines: Vec<String>,
        scorer: RelevanceScorer,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            guidelines,
            scorer,
        }
    }
}

#[async_trait]
impl LayerBuilder for InstructionsBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Instructions
    }

    async fn build(&self, _input: &BuildInput<'_>) -> Result<ContextLayer> {
        Ok(ContextLayer::active(
            LayerData::Instructions(InstructionsData {
                system_prompt: self.system_prompt.trim().to_string(),
                guidelines: self.guidelines.clone(),
            }),
            self.scorer.active_relevance(LayerId::Instructions),
        ))
    }
}

/// Default rules first, then the session's own, without duplicates.
pub struct ConstraintsBuilder {
    defaults: Vec<String>,
    scorer: RelevanceScorer,
}

impl ConstraintsBuilder {
    pub fn new(defaults: Vec<String>, scorer: RelevanceScorer) -> Self {
        Self { defaults, scorer }
    }
}

#[async_trait]
impl LayerBuilder for ConstraintsBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Constraints
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let mut rules: Vec<String> = Vec::new();
        for rule in self.defaults.iter().chain(&input.session.constraints) {
            let rule = rule.trim();
            if !rule.is_empty() && !rules.iter().any(|r| r == rule) {
                rules.push(rule.to_string());
            }
        }
        Ok(ContextLayer::active(
            LayerData::Constraints(ConstraintsData { rules }),
            self.scorer.active_relevance(LayerId::Constraints),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::session::Session;

    #[tokio::test]
    async fn instructions_render_prompt_and_guidelines() {
        let session = Session::new("u", "s");
        let builder = InstructionsBuilder::new(
            "You are terse. Answer briefly.",
            vec!["Use SI units".into()],
            RelevanceScorer::default(),
        );
        let layer = builder.build(&BuildInput::new(&session, "hi", &[])).await.unwrap();
        assert!(layer.is_active());
        assert_eq!(layer.relevance_score, 1.0);
        assert_eq!(
            layer.data.render(),
            "You are terse. Answer briefly.\n\nGuidelines:\n- Use SI units"
        );
    }

    #[tokio::test]
    async fn session_constraints_follow_defaults() {
        let mut session = Session::new("u", "s");
        session.constraints = vec!["Reply in French".into(), "No spoilers".into(), "  ".into()];
        let builder = ConstraintsBuilder::new(
            vec!["No spoilers".into(), "Stay on topic".into()],
            RelevanceScorer::default(),
        );
        let layer = builder.build(&BuildInput::new(&session, "hi", &[])).await.unwrap();
        match &layer.data {
            LayerData::Constraints(c) => {
                assert_eq!(c.rules, vec!["No spoilers", "Stay on topic", "Reply in French"]);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(layer.relevance_score, 0.95);
    }

    #[tokio::test]
    async fn constraints_active_even_when_empty() {
        let session = Session::new("u", "s");
        let builder = ConstraintsBuilder::new(Vec::new(), RelevanceScorer::default());
        let layer = builder.build(&BuildInput::new(&session, "hi", &[])).await.unwrap();
        assert!(layer.is_active());
        assert_eq!(layer.token_count, 0);
    }
}
