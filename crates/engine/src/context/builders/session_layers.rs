//! Layers read straight off the session: user info (2), task state (4) and
//! conversation context (8).

use super::{BuildInput, LayerBuilder};
use crate::context::layer::{
    ContextLayer, ConversationData, LayerData, LayerId, TaskStateData, Turn, UserInfoData,
};
use crate::context::scorer::RelevanceScorer;
use async_trait::async_trait;
use strata_core::Result;

pub struct UserInfoBuilder {
    scorer: RelevanceScorer,
}

impl UserInfoBuilder {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl LayerBuilder for UserInfoBuilder {
    fn layer(&self) -> LayerId {
        LayerId::UserInfo
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let session = input.session;
        if !session.has_profile_data() {
            return Ok(ContextLayer::inactive(
                LayerId::UserInfo,
                self.scorer.inactive_relevance(LayerId::UserInfo),
            ));
        }
        Ok(ContextLayer::active(
            LayerData::UserInfo(UserInfoData {
                profile: session.profile.clone(),
                preferences: session.preferences.clone(),
            }),
            self.scorer.active_relevance(LayerId::UserInfo),
        ))
    }
}

/// Only open tasks make it into the layer.
pub struct TaskStateBuilder {
    scorer: RelevanceScorer,
}

impl TaskStateBuilder {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl LayerBuilder for TaskStateBuilder {
    fn layer(&self) -> LayerId {
        LayerId::TaskState
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let tasks: Vec<_> = input.session.open_tasks().cloned().collect();
        if tasks.is_empty() {
            return Ok(ContextLayer::inactive(
                LayerId::TaskState,
                self.scorer.inactive_relevance(LayerId::TaskState),
            ));
        }
        Ok(ContextLayer::active(
            LayerData::TaskState(TaskStateData { tasks }),
            self.scorer.active_relevance(LayerId::TaskState),
        ))
    }
}

pub struct ConversationBuilder {
    scorer: RelevanceScorer,
}

impl ConversationBuilder {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl LayerBuilder for ConversationBuilder {
    fn layer(&self) -> LayerId {
        LayerId::ConversationContext
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        // Ring buffer is already oldest first
        let turns: Vec<Turn> = input
            .session
            .recent_turns
            .iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        if turns.is_empty() {
            return Ok(ContextLayer::inactive(
                LayerId::ConversationContext,
                self.scorer.inactive_relevance(LayerId::ConversationContext),
            ));
        }
        Ok(ContextLayer::active(
            LayerData::ConversationContext(ConversationData { turns }),
            self.scorer.active_relevance(LayerId::ConversationContext),
        ))
    }
}
