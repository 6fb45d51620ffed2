//! Layers backed by external lookups: knowledge (3) and memory (5).
//!
//! These are the only builders that suspend on I/O, so the assembler runs
//! them under its per-call timeout. Neither writes anything back.

use super::{BuildInput, LayerBuilder};
use crate::context::layer::{
    ContextLayer, KnowledgeData, KnowledgeDocument, LayerData, LayerId, MemoryData, MemorySnippet,
};
use crate::context::scorer::RelevanceScorer;
use crate::knowledge::KnowledgeRetriever;
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::Result;
use strata_core::memory::MemoryTier;
use strata_memory::TieredMemory;
use tracing::debug;

pub struct KnowledgeBuilder {
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    top_k: usize,
    min_score: f32,
    attachment_char_cap: usize,
    scorer: RelevanceScorer,
}

impl KnowledgeBuilder {
    pub fn new(
        retriever: Option<Arc<dyn KnowledgeRetriever>>,
        config: &strata_config::ContextConfig,
        scorer: RelevanceScorer,
    ) -> Self {
        Self {
            retriever,
            top_k: config.knowledge_top_k,
            min_score: config.knowledge_min_score,
            attachment_char_cap: config.attachment_char_cap,
            scorer,
        }
    }
}

#[async_trait]
impl LayerBuilder for KnowledgeBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Knowledge
    }

    fn is_external(&self) -> bool {
        true
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let mut documents: Vec<KnowledgeDocument> = input
            .all_attachments()
            .into_iter()
            .filter(|a| a.has_content())
            .map(|a| KnowledgeDocument {
                source: a.name.clone(),
                content: a.extracted_text.chars().take(self.attachment_char_cap).collect(),
                score: 1.0,
                from_attachment: true,
            })
            .collect();

        if let Some(retriever) = &self.retriever {
            if !input.query.trim().is_empty() {
                let chunks = retriever
                    .retrieve(input.query, self.top_k, self.min_score)
                    .await?;
                documents.extend(chunks.into_iter().map(|c| KnowledgeDocument {
                    source: c.source,
                    content: c.content,
                    score: c.similarity,
                    from_attachment: false,
                }));
            }
        }

        if documents.is_empty() {
            return Ok(ContextLayer::inactive(
                LayerId::Knowledge,
                self.scorer.inactive_relevance(LayerId::Knowledge),
            ));
        }
        debug!(documents = documents.len(), "Knowledge layer populated");
        Ok(ContextLayer::active(
            LayerData::Knowledge(KnowledgeData { documents }),
            self.scorer.active_relevance(LayerId::Knowledge),
        ))
    }
}

/// Always active; an owner with no memories yields empty tiers at the
/// floor relevance.
pub struct MemoryBuilder {
    memory: Arc<TieredMemory>,
    limit: usize,
    scorer: RelevanceScorer,
}

impl MemoryBuilder {
    pub fn new(memory: Arc<TieredMemory>, limit: usize, scorer: RelevanceScorer) -> Self {
        Self {
            memory,
            limit,
            scorer,
        }
    }
}

#[async_trait]
impl LayerBuilder for MemoryBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Memory
    }

    fn is_external(&self) -> bool {
        true
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let results = self
            .memory
            .retrieve(input.query, &input.session.user_id, self.limit)
            .await?;

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        let mut data = MemoryData::default();
        for r in results {
            let snippet = MemorySnippet {
                id: r.item.id,
                content: r.item.content,
            };
            match r.item.tier {
                MemoryTier::Short => data.short.push(snippet),
                MemoryTier::Medium => data.medium.push(snippet),
                MemoryTier::Long => data.long.push(snippet),
            }
        }

        Ok(ContextLayer::active(
            LayerData::Memory(data),
            self.scorer.memory_relevance(&scores),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryKnowledgeBase;
    use strata_core::session::{Attachment, Session};
    use strata_memory::{InMemoryBackend, Observation, TierSettings};
    use strata_providers::HashingEmbedder;

    fn config() -> strata_config::ContextConfig {
        strata_config::ContextConfig::default()
    }

    fn memory() -> Arc<TieredMemory> {
        Arc::new(TieredMemory::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashingEmbedder::new()),
            TierSettings::default(),
        ))
    }

    #[tokio::test]
    async fn knowledge_inactive_without_sources() {
        let session = Session::new("u", "s");
        let builder = KnowledgeBuilder::new(None, &config(), RelevanceScorer::default());
        let layer = builder.build(&BuildInput::new(&session, "hi", &[])).await.unwrap();
        assert!(!layer.is_active());
        assert_eq!(layer.relevance_score, 0.1);
    }

    #[tokio::test]
    async fn attachments_activate_knowledge_and_are_capped() {
        let session = Session::new("u", "s");
        let mut cfg = config();
        cfg.attachment_char_cap = 10;
        let builder = KnowledgeBuilder::new(None, &cfg, RelevanceScorer::default());
        let files = vec![
            Attachment::new("report.txt", "Quarterly revenue grew by twelve percent"),
            Attachment::new("blank.txt", "  "),
        ];
        let layer = builder
            .build(&BuildInput::new(&session, "summarize this", &files))
            .await
            .unwrap();
        assert!(layer.is_active());
        assert_eq!(layer.relevance_score, 0.9);
        match &layer.data {
            LayerData::Knowledge(k) => {
                assert_eq!(k.documents.len(), 1);
                assert_eq!(k.documents[0].content, "Quarterly ");
                assert!(k.documents[0].from_attachment);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_and_turn_attachments_are_merged_once() {
        let mut session = Session::new("u", "s");
        let shared = Attachment::new("plan.md", "ship the beta on friday");
        session.attachments.push(shared.clone());
        let builder = KnowledgeBuilder::new(None, &config(), RelevanceScorer::default());
        let files = vec![shared, Attachment::new("notes.md", "beta testers signed up")];
        let layer = builder
            .build(&BuildInput::new(&session, "status?", &files))
            .await
            .unwrap();
        match &layer.data {
            LayerData::Knowledge(k) => assert_eq!(k.documents.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn retrieved_chunks_join_attachments() {
        let session = Session::new("u", "s");
        let kb = Arc::new(InMemoryKnowledgeBase::new(Arc::new(HashingEmbedder::new())));
        kb.add_document("faq.md", "Refunds are processed within five business days")
            .await
            .unwrap();
        let builder = KnowledgeBuilder::new(Some(kb), &config(), RelevanceScorer::default());
        let layer = builder
            .build(&BuildInput::new(&session, "how long are refunds processed", &[]))
            .await
            .unwrap();
        assert!(layer.is_active());
        assert!(layer.data.render().starts_with("[faq.md]"));
    }

    #[tokio::test]
    async fn memory_layer_active_with_empty_tiers() {
        let session = Session::new("u", "s");
        let builder = MemoryBuilder::new(memory(), 8, RelevanceScorer::default());
        let layer = builder.build(&BuildInput::new(&session, "hi", &[])).await.unwrap();
        assert!(layer.is_active());
        assert_eq!(layer.token_count, 0);
        assert_eq!(layer.relevance_score, 0.3);
    }

    #[tokio::test]
    async fn memory_layer_splits_tiers() {
        let memory = memory();
        let content = "I am planning a kayaking trip along the northern coast next month \
                       and need advice on tides";
        memory
            .observe(&Observation::new("u", content).session("s"))
            .await
            .unwrap();

        let session = Session::new("u", "s");
        let builder = MemoryBuilder::new(memory, 8, RelevanceScorer::default());
        let layer = builder
            .build(&BuildInput::new(&session, "kayaking tides", &[]))
            .await
            .unwrap();
        match &layer.data {
            LayerData::Memory(m) => {
                // Stored in all three tiers; dedup keeps the embedded copy,
                // which outranks the others on similarity
                assert_eq!(m.ids().len(), 1);
                assert_eq!(m.long.len(), 1);
                assert!(m.short.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(layer.relevance_score >= 0.3);
    }
}
