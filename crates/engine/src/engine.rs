//! The engine facade: one object the host application talks to.
//!
//! Owns the session table, the assembler, the generation gateway and the
//! state updater. Every operation on a session takes that session's
//! `tokio::sync::Mutex`, so concurrent messages for one session queue in
//! arrival order while different sessions proceed independently.
//!
//! ```text
//! process_turn:  lock ─► assemble ─► generate ─► commit ─► unlock
//! ```

use crate::context::builders::{BuilderDeps, BuilderSet, ExampleCatalog};
use crate::context::compressor::CompressionReport;
use crate::context::layer::{ContextLayer, ContextWindow, LayerId};
use crate::context::ContextAssembler;
use crate::gateway::{GenerationGateway, GenerationOptions, GenerationResult};
use crate::knowledge::{InMemoryKnowledgeBase, KnowledgeRetriever};
use crate::snapshot::{InMemorySnapshotStore, LayerSnapshot, SnapshotStore};
use crate::state_updater::{CommitOutcome, StateUpdater};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use strata_config::AppConfig;
use strata_core::error::{ContextError, Error};
use strata_core::event::{DomainEvent, EventBus};
use strata_core::memory::{MemoryBackend, MemoryTier};
use strata_core::provider::Embedder;
use strata_core::session::{Attachment, Session};
use strata_core::tool::ToolCatalog;
use strata_core::Result;
use strata_memory::{
    FileBackend, HeuristicRetention, InMemoryBackend, ScoredMemory, TierSettings, TieredMemory,
};
use strata_providers::{ProviderRouter, build_embedder_from_config, build_from_config};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Everything one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub window: ContextWindow,
    pub generation: GenerationResult,
    #[serde(skip)]
    pub commit: CommitOutcome,
}

struct SessionEntry {
    session: Session,
    /// The most recently assembled window
    window: Option<ContextWindow>,
}

type SessionHandle = Arc<Mutex<SessionEntry>>;

pub struct ContextEngine {
    assembler: ContextAssembler,
    gateway: GenerationGateway,
    updater: StateUpdater,
    memory: Arc<TieredMemory>,
    knowledge: Arc<InMemoryKnowledgeBase>,
    events: Arc<EventBus>,
    options: GenerationOptions,
    session_idle: chrono::Duration,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl ContextEngine {
    /// Wire the engine from configuration: providers from `[providers]`, the
    /// embedding chain from `[embedding]`, the memory backend from `[memory]`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let router = build_from_config(config);
        let embedder: Arc<dyn Embedder> = Arc::new(build_embedder_from_config(config, &router));
        let backend: Arc<dyn MemoryBackend> = match config.memory.backend.as_str() {
            "in_memory" => Arc::new(InMemoryBackend::new()),
            "file" => Arc::new(FileBackend::new(config.memory_path())),
            other => {
                return Err(Error::Config {
                    message: format!("unknown memory backend '{other}' (expected in_memory or file)"),
                });
            }
        };
        Ok(Self::from_parts(config, router, embedder, backend))
    }

    /// Wire the engine around explicit collaborators.
    pub fn from_parts(
        config: &AppConfig,
        router: ProviderRouter,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn MemoryBackend>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let memory = Arc::new(
            TieredMemory::new(backend, embedder.clone(), tier_settings(config))
                .with_policy(Arc::new(HeuristicRetention {
                    significance_min_chars: config.memory.significance_min_chars,
                    persistence_min_chars: config.memory.persistence_min_chars,
                    redundancy_threshold: config.memory.redundancy_threshold,
                }))
                .with_events(events.clone()),
        );
        let knowledge = Arc::new(InMemoryKnowledgeBase::new(embedder));

        let builders = BuilderSet::standard(BuilderDeps {
            config: config.context.clone(),
            memory: memory.clone(),
            knowledge: Some(knowledge.clone() as Arc<dyn KnowledgeRetriever>),
            tools: Arc::new(ToolCatalog::builtin()),
            examples: Arc::new(ExampleCatalog::builtin()),
        });
        let assembler = ContextAssembler::new(builders, &config.context).with_events(events.clone());
        let gateway = GenerationGateway::new(Arc::new(router), config.generation.clone())
            .with_events(events.clone());
        let updater = StateUpdater::new(memory.clone(), Arc::new(InMemorySnapshotStore::new()));

        Self {
            assembler,
            gateway,
            updater,
            memory,
            knowledge,
            events,
            options: GenerationOptions::from_config(config),
            session_idle: chrono::Duration::seconds(
                i64::try_from(config.context.session_idle_secs).unwrap_or(i64::MAX),
            ),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different assembler (custom builders, budget or compressor).
    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler.with_events(self.events.clone());
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.updater = StateUpdater::new(self.memory.clone(), store);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn memory(&self) -> &Arc<TieredMemory> {
        &self.memory
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    /// Index a document for the knowledge layer. Returns its id.
    pub async fn add_knowledge(&self, source: &str, text: &str) -> Result<String> {
        self.knowledge.add_document(source, text).await
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    async fn handle(&self, user_id: &str, session_id: &str) -> Result<SessionHandle> {
        if let Some(handle) = self.existing(session_id).await {
            return check_owner(handle, user_id).await;
        }
        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, user_id, "Session created");
                Arc::new(Mutex::new(SessionEntry {
                    session: Session::new(user_id, session_id),
                    window: None,
                }))
            })
            .clone();
        drop(sessions);
        check_owner(handle, user_id).await
    }

    async fn existing(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Mutate a session (profile, tasks, constraints...), creating it first
    /// if needed.
    pub async fn update_session<F>(&self, user_id: &str, session_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let handle = self.handle(user_id, session_id).await?;
        let mut entry = handle.lock().await;
        f(&mut entry.session);
        Ok(())
    }

    /// A copy of the session's current state.
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        let handle = self.existing(session_id).await?;
        let entry = handle.lock().await;
        Some(entry.session.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Assemble a window for `query` without calling the model.
    pub async fn build_context_window(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
        attachments: &[Attachment],
    ) -> Result<ContextWindow> {
        let handle = self.handle(user_id, session_id).await?;
        let mut entry = handle.lock().await;
        let window = self
            .assembler
            .assemble(&entry.session, query, attachments)
            .await?;
        entry.window = Some(window.clone());
        Ok(window)
    }

    /// One layer of the session's most recent window, by id 1..=11.
    pub async fn get_layer(&self, session_id: &str, layer: u8) -> Result<ContextLayer> {
        let id = LayerId::from_number(layer)?;
        let handle = self
            .existing(session_id)
            .await
            .ok_or_else(|| ContextError::NoWindow(session_id.to_string()))?;
        let entry = handle.lock().await;
        entry
            .window
            .as_ref()
            .and_then(|w| w.layer(id))
            .cloned()
            .ok_or_else(|| ContextError::NoWindow(session_id.to_string()).into())
    }

    /// Layer shapes saved by the last committed turn.
    pub async fn layer_snapshots(&self, session_id: &str) -> Result<Vec<LayerSnapshot>> {
        self.updater.snapshots().load(session_id).await
    }

    /// Search a user's memories, optionally within one tier.
    pub async fn search_memory(
        &self,
        user_id: &str,
        query: &str,
        tier: Option<MemoryTier>,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        Ok(self.memory.search(query, user_id, tier, limit).await?)
    }

    /// Re-compress the session's most recent window to `target_tokens`.
    ///
    /// Works on a copy: if the target is infeasible the stored window is left
    /// untouched and the error returned.
    pub async fn optimize(
        &self,
        session_id: &str,
        target_tokens: usize,
        preserve: &[LayerId],
    ) -> Result<(ContextWindow, CompressionReport)> {
        let handle = self
            .existing(session_id)
            .await
            .ok_or_else(|| ContextError::NoWindow(session_id.to_string()))?;
        let mut entry = handle.lock().await;
        let mut window = entry
            .window
            .clone()
            .ok_or_else(|| ContextError::NoWindow(session_id.to_string()))?;

        let report = self
            .assembler
            .compressor()
            .compress(&mut window, target_tokens, preserve)?;
        entry.window = Some(window.clone());
        Ok((window, report))
    }

    /// Clear a session's conversation. Unless `preserve_memory` is set, the
    /// short and medium memories it produced are dropped too; long-term
    /// memories always survive.
    pub async fn reset(&self, session_id: &str, preserve_memory: bool) -> Result<()> {
        let Some(handle) = self.existing(session_id).await else {
            return Ok(());
        };
        let mut entry = handle.lock().await;
        if !preserve_memory {
            let user_id = entry.session.user_id.clone();
            self.memory.end_session(&user_id, session_id).await?;
        }
        entry.session.clear_conversation();
        entry.window = None;
        self.updater.snapshots().clear(session_id).await?;

        info!(session_id, preserve_memory, "Session reset");
        self.events.publish(DomainEvent::SessionReset {
            session_id: session_id.to_string(),
            memory_preserved: preserve_memory,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Assemble, generate and commit one turn under the session lock.
    pub async fn process_turn(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
        attachments: &[Attachment],
    ) -> Result<TurnResult> {
        let handle = self.handle(user_id, session_id).await?;
        let mut entry = handle.lock().await;

        let window = self
            .assembler
            .assemble(&entry.session, query, attachments)
            .await?;
        let generation = self.gateway.generate(&window, &self.options).await?;
        let commit = self
            .updater
            .commit(&mut entry.session, &window, query, attachments, &generation.text)
            .await?;
        entry.window = Some(window.clone());

        Ok(TurnResult {
            window,
            generation,
            commit,
        })
    }

    /// Tear down sessions idle for longer than `context.session_idle_secs`
    /// and purge expired memories. Busy sessions are skipped.
    pub async fn expire_idle(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|id, handle| match handle.try_lock() {
                Ok(entry) if entry.session.is_idle(now, self.session_idle) => {
                    expired.push((entry.session.user_id.clone(), id.clone()));
                    false
                }
                _ => true,
            });
        }

        for (user_id, session_id) in &expired {
            self.memory.end_session(user_id, session_id).await?;
            self.updater.snapshots().clear(session_id).await?;
        }
        self.memory.purge_expired(now).await?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Idle sessions expired");
        }
        Ok(expired.len())
    }
}

async fn check_owner(handle: SessionHandle, user_id: &str) -> Result<SessionHandle> {
    let (session_id, owner) = {
        let entry = handle.lock().await;
        (entry.session.session_id.clone(), entry.session.user_id.clone())
    };
    if owner != user_id {
        return Err(Error::SessionOwnership {
            session_id,
            owner,
            user_id: user_id.to_string(),
        });
    }
    Ok(handle)
}

fn tier_settings(config: &AppConfig) -> TierSettings {
    let m = &config.memory;
    let secs = |s: u64| chrono::Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX));
    TierSettings {
        short_capacity: m.short_capacity,
        short_ttl: secs(m.short_ttl_secs),
        medium_ttl: secs(m.medium_ttl_secs),
        long_cap_per_owner: m.long_cap_per_owner,
        recency_window_secs: m.recency_window_secs as f64,
        recency_weight: config.context.weights.recency,
        similarity_weight: config.context.weights.similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strata_core::error::{GenerationError, ProviderError};
    use strata_core::message::{Message, Role};
    use strata_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use strata_providers::HashingEmbedder;

    /// Echoes the last user message back and counts calls.
    #[derive(Default)]
    struct EchoProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            // Give concurrent turns a chance to interleave
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ProviderResponse {
                message: Message::assistant(format!("reply {n} to: {last}")),
                usage: None,
                model: request.model,
                metadata: serde_json::Map::new(),
            })
        }
    }

    struct DownProvider;

    #[async_trait]
    impl Provider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Network("connection refused".into()))
        }
    }

    fn engine_with(provider: Arc<dyn Provider>) -> ContextEngine {
        let mut config = AppConfig::default();
        config.default_provider = "echo".into();
        config.default_model = "echo-1".into();
        let mut router = ProviderRouter::new("echo");
        router.register("echo", provider);
        ContextEngine::from_parts(
            &config,
            router,
            Arc::new(HashingEmbedder::new()),
            Arc::new(InMemoryBackend::new()),
        )
    }

    fn engine() -> ContextEngine {
        engine_with(Arc::new(EchoProvider::default()))
    }

    #[tokio::test]
    async fn process_turn_commits_state() {
        let engine = engine();
        let turn = engine
            .process_turn("alice", "s1", "remember that my project deadline is friday", &[])
            .await
            .unwrap();
        assert!(turn.generation.text.contains("project deadline"));
        assert_eq!(turn.window.layers.len(), 11);

        let session = engine.session("s1").await.unwrap();
        assert_eq!(session.turn_count, 1);
        assert_eq!(session.recent_turns.len(), 2);
        assert_eq!(engine.layer_snapshots("s1").await.unwrap().len(), 11);

        let hits = engine
            .search_memory("alice", "deadline", Some(MemoryTier::Medium), 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn conversation_layer_carries_previous_turns() {
        let engine = engine();
        engine.process_turn("alice", "s1", "first question", &[]).await.unwrap();
        let window = engine
            .build_context_window("alice", "s1", "second question", &[])
            .await
            .unwrap();
        let conv = window.layer(LayerId::ConversationContext).unwrap();
        assert!(conv.is_active());
        assert!(conv.data.render().contains("first question"));
    }

    #[tokio::test]
    async fn get_layer_needs_a_window_and_a_valid_id() {
        let engine = engine();
        let err = engine.get_layer("s1", 1).await.unwrap_err();
        assert!(matches!(err, Error::Context(ContextError::NoWindow(_))));

        engine.build_context_window("alice", "s1", "hi", &[]).await.unwrap();
        let layer = engine.get_layer("s1", 11).await.unwrap();
        assert_eq!(layer.id, LayerId::UserQuery);

        let err = engine.get_layer("s1", 12).await.unwrap_err();
        assert!(matches!(err, Error::Context(ContextError::UnknownLayer(12))));
    }

    #[tokio::test]
    async fn optimize_compresses_a_copy() {
        let engine = engine();
        let files = vec![Attachment::new("big.txt", "lots of words here. ".repeat(200))];
        let window = engine
            .build_context_window("alice", "s1", "summarize this", &files)
            .await
            .unwrap();
        assert!(window.layer(LayerId::Knowledge).unwrap().is_active());

        let err = engine.optimize("s1", 2, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Context(ContextError::BudgetInfeasible { budget: 2, .. })
        ));
        // The failed attempt left the stored window alone
        assert!(engine.get_layer("s1", 3).await.unwrap().is_active());

        let (optimized, report) = engine
            .optimize("s1", 200, &[LayerId::ConversationContext])
            .await
            .unwrap();
        assert!(optimized.total_tokens <= 200);
        assert!(report.dropped.contains(&LayerId::Knowledge));
        assert!(!engine.get_layer("s1", 3).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn reset_clears_conversation_and_session_memory() {
        let engine = engine();
        let mut rx = engine.events().subscribe();
        engine
            .process_turn("alice", "s1", "please remember the task list for the launch plan", &[])
            .await
            .unwrap();

        engine.reset("s1", false).await.unwrap();
        let session = engine.session("s1").await.unwrap();
        assert!(session.recent_turns.is_empty());
        assert_eq!(session.turn_count, 0);
        assert!(engine.layer_snapshots("s1").await.unwrap().is_empty());
        let medium = engine
            .search_memory("alice", "launch plan", Some(MemoryTier::Medium), 5)
            .await
            .unwrap();
        assert!(medium.is_empty());

        let mut saw_reset = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::SessionReset { memory_preserved, .. } = event.as_ref() {
                assert!(!memory_preserved);
                saw_reset = true;
            }
        }
        assert!(saw_reset);
    }

    #[tokio::test]
    async fn reset_can_keep_memory() {
        let engine = engine();
        engine
            .process_turn("alice", "s1", "please remember the task list for the launch plan", &[])
            .await
            .unwrap();
        engine.reset("s1", true).await.unwrap();
        let medium = engine
            .search_memory("alice", "launch plan", Some(MemoryTier::Medium), 5)
            .await
            .unwrap();
        assert!(!medium.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_leaves_session_untouched() {
        let engine = engine_with(Arc::new(DownProvider));
        let err = engine.process_turn("alice", "s1", "hello there", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Generation(GenerationError::Unavailable { .. })
        ));
        let session = engine.session("s1").await.unwrap();
        assert_eq!(session.turn_count, 0);
        assert!(session.recent_turns.is_empty());
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_queue() {
        let engine = Arc::new(engine());
        let mut tasks = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .process_turn("alice", "s1", &format!("message {i}"), &[])
                    .await
                    .map(|_| ())
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let session = engine.session("s1").await.unwrap();
        assert_eq!(session.turn_count, 4);
        // Strict user/assistant alternation: no turn interleaved with another
        let roles: Vec<Role> = session.recent_turns.iter().map(|m| m.role).collect();
        for pair in roles.chunks(2) {
            assert_eq!(pair, [Role::User, Role::Assistant]);
        }
    }

    #[tokio::test]
    async fn sessions_are_owned_by_one_user() {
        let engine = engine();
        engine.build_context_window("alice", "s1", "hi", &[]).await.unwrap();
        let err = engine.build_context_window("bob", "s1", "hi", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SessionOwnership { ref session_id, ref owner, ref user_id }
                if session_id == "s1" && owner == "alice" && user_id == "bob"
        ));
        assert!(engine.session("s1").await.is_some_and(|s| s.user_id == "alice"));
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let engine = engine();
        engine.build_context_window("alice", "s1", "hi", &[]).await.unwrap();
        assert_eq!(engine.expire_idle(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(engine.expire_idle(later).await.unwrap(), 1);
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test]
    async fn knowledge_documents_feed_the_knowledge_layer() {
        let engine = engine();
        engine
            .add_knowledge("faq.md", "Refunds are processed within five business days")
            .await
            .unwrap();
        let window = engine
            .build_context_window("alice", "s1", "how long are refunds processed", &[])
            .await
            .unwrap();
        assert!(window.layer(LayerId::Knowledge).unwrap().is_active());
    }
}
