//! Turn commit: the only writer of durable state.
//!
//! Runs after a reply has been generated:
//!
//! 1. append the user and assistant messages to the session ring buffer,
//! 2. keep this turn's attachments on the session for later turns,
//! 3. offer both messages to the tiered memory (short always, medium and
//!    long when their predicates accept); the user message is tagged `file`
//!    when the turn carried attachments and `task` while tasks are open,
//!    which makes it significant regardless of length,
//! 4. bump access counts on the memories the window actually used,
//! 5. save layer snapshots for the next turn.
//!
//! Memory failures are logged and counted, never fatal: the reply has
//! already been produced and the session update must not be lost.

use crate::context::layer::{ContextWindow, LayerData, LayerId};
use crate::snapshot::{LayerSnapshot, SnapshotStore};
use std::sync::Arc;
use strata_core::Result;
use strata_core::message::Message;
use strata_core::session::{Attachment, Session};
use strata_memory::{Observation, TieredMemory};
use tracing::{debug, warn};

/// What a commit wrote.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Messages that reached at least the short tier
    pub memories_stored: usize,
    /// Messages that reached the long tier
    pub memories_persisted: usize,
    pub memories_touched: usize,
    pub memory_errors: usize,
}

pub struct StateUpdater {
    memory: Arc<TieredMemory>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl StateUpdater {
    pub fn new(memory: Arc<TieredMemory>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { memory, snapshots }
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub async fn commit(
        &self,
        session: &mut Session,
        window: &ContextWindow,
        query: &str,
        attachments: &[Attachment],
        reply: &str,
    ) -> Result<CommitOutcome> {
        let mut user_message = Message::user(query);
        if !attachments.is_empty() {
            user_message.metadata.insert(
                "attachments".into(),
                serde_json::json!(attachments.iter().map(|a| &a.id).collect::<Vec<_>>()),
            );
        }
        session.push_turn(user_message);
        session.push_turn(Message::assistant(reply));
        session.turn_count += 1;
        for a in attachments {
            if !session.attachments.iter().any(|seen| seen.id == a.id) {
                session.attachments.push(a.clone());
            }
        }

        let mut event_tags = Vec::new();
        if !attachments.is_empty() {
            event_tags.push("file");
        }
        if session.open_tasks().next().is_some() {
            event_tags.push("task");
        }

        let mut outcome = CommitOutcome::default();
        for (role, content) in [("user", query), ("assistant", reply)] {
            if content.trim().is_empty() {
                continue;
            }
            let mut observation = Observation::new(&session.user_id, content)
                .session(&session.session_id)
                .tag(role);
            if role == "user" {
                for tag in &event_tags {
                    observation = observation.tag(*tag);
                }
            }
            match self.memory.observe(&observation).await {
                Ok(stored) => {
                    outcome.memories_stored += 1;
                    if stored.long.is_some() {
                        outcome.memories_persisted += 1;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, role, error = %e, "Failed to store turn in memory");
                    outcome.memory_errors += 1;
                }
            }
        }

        let used = used_memory_ids(window);
        if !used.is_empty() {
            match self.memory.touch(&session.user_id, &used).await {
                Ok(()) => outcome.memories_touched = used.len(),
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Failed to record memory access");
                    outcome.memory_errors += 1;
                }
            }
        }

        self.snapshots
            .save(&session.session_id, LayerSnapshot::capture(window))
            .await?;

        debug!(
            session_id = %session.session_id,
            turn = session.turn_count,
            stored = outcome.memories_stored,
            touched = outcome.memories_touched,
            "Turn committed"
        );
        Ok(outcome)
    }
}

fn used_memory_ids(window: &ContextWindow) -> Vec<String> {
    match window.layer(LayerId::Memory) {
        Some(layer) if layer.is_active() => match &layer.data {
            LayerData::Memory(m) => m.ids(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::layer::{ContextLayer, MemoryData, MemorySnippet, QueryData};
    use crate::snapshot::InMemorySnapshotStore;
    use strata_core::memory::MemoryTier;
    use strata_core::message::Role;
    use strata_memory::{InMemoryBackend, TierSettings};
    use strata_providers::HashingEmbedder;

    fn memory() -> Arc<TieredMemory> {
        Arc::new(TieredMemory::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashingEmbedder::new()),
            TierSettings::default(),
        ))
    }

    fn window(memory: MemoryData) -> ContextWindow {
        let layers = LayerId::ALL
            .iter()
            .map(|id| match id {
                LayerId::Memory => ContextLayer::active(LayerData::Memory(memory.clone()), 0.5),
                LayerId::UserQuery => ContextLayer::active(
                    LayerData::UserQuery(QueryData {
                        text: "q".into(),
                        ..Default::default()
                    }),
                    1.0,
                ),
                other => ContextLayer::inactive(*other, 0.0),
            })
            .collect();
        ContextWindow::new("s1", layers, 4096)
    }

    #[tokio::test]
    async fn commit_updates_session_memory_and_snapshots() {
        let memory = memory();
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let updater = StateUpdater::new(memory.clone(), snapshots.clone());
        let mut session = Session::new("alice", "s1");
        let files = vec![Attachment::new("notes.txt", "tide tables for May")];

        let outcome = updater
            .commit(
                &mut session,
                &window(MemoryData::default()),
                "what are the tides in May",
                &files,
                "High tide is at 06:10.",
            )
            .await
            .unwrap();

        assert_eq!(session.turn_count, 1);
        assert_eq!(session.recent_turns.len(), 2);
        assert_eq!(session.recent_turns[0].role, Role::User);
        assert_eq!(session.recent_turns[1].role, Role::Assistant);
        assert!(session.recent_turns[0].metadata.contains_key("attachments"));
        assert_eq!(session.attachments.len(), 1);

        assert_eq!(outcome.memories_stored, 2);
        assert_eq!(outcome.memory_errors, 0);
        let short = memory
            .search("tides", "alice", Some(MemoryTier::Short), 10)
            .await
            .unwrap();
        assert!(!short.is_empty());

        assert_eq!(snapshots.load("s1").await.unwrap().len(), 11);
    }

    #[tokio::test]
    async fn used_memories_are_touched() {
        let memory = memory();
        let outcome = memory
            .observe(&Observation::new("alice", "prefers metric units").session("s0"))
            .await
            .unwrap();
        let id = outcome.short.unwrap();

        let used = MemoryData {
            short: vec![MemorySnippet {
                id: id.clone(),
                content: "prefers metric units".into(),
            }],
            ..Default::default()
        };
        let updater = StateUpdater::new(memory.clone(), Arc::new(InMemorySnapshotStore::new()));
        let mut session = Session::new("alice", "s1");
        let outcome = updater
            .commit(&mut session, &window(used), "convert 5 miles", &[], "8 km")
            .await
            .unwrap();
        assert_eq!(outcome.memories_touched, 1);

        let item = memory.backend().get("alice", &id).await.unwrap().unwrap();
        assert_eq!(item.access_count, 1);
    }

    #[tokio::test]
    async fn repeated_attachments_are_kept_once() {
        let updater = StateUpdater::new(memory(), Arc::new(InMemorySnapshotStore::new()));
        let mut session = Session::new("alice", "s1");
        let file = Attachment::new("plan.md", "ship friday");
        for _ in 0..2 {
            updater
                .commit(
                    &mut session,
                    &window(MemoryData::default()),
                    "status?",
                    std::slice::from_ref(&file),
                    "on track",
                )
                .await
                .unwrap();
        }
        assert_eq!(session.attachments.len(), 1);
        assert_eq!(session.turn_count, 2);
        assert_eq!(session.recent_turns.len(), 4);
    }

    #[tokio::test]
    async fn file_and_task_turns_reach_the_medium_tier() {
        let memory = memory();
        let updater = StateUpdater::new(memory.clone(), Arc::new(InMemorySnapshotStore::new()));
        let mut session = Session::new("alice", "s1");
        let empty = window(MemoryData::default());

        updater
            .commit(&mut session, &empty, "thanks", &[], "Sure.")
            .await
            .unwrap();
        assert_eq!(memory.backend().count("alice", Some(MemoryTier::Medium)).await.unwrap(), 0);

        let report = Attachment::new("q3.pdf", "revenue grew four percent");
        updater
            .commit(&mut session, &empty, "summarize this", &[report], "Short ok.")
            .await
            .unwrap();
        let medium = memory.backend().list("alice", Some(MemoryTier::Medium)).await.unwrap();
        assert_eq!(medium.len(), 1);
        assert_eq!(medium[0].content, "summarize this");
        assert!(medium[0].tags.iter().any(|t| t == "file"));

        session.add_task("draft the launch email");
        updater
            .commit(&mut session, &empty, "any update?", &[], "Not yet.")
            .await
            .unwrap();
        let medium = memory.backend().list("alice", Some(MemoryTier::Medium)).await.unwrap();
        assert_eq!(medium.len(), 2);
        assert!(medium.iter().any(|i| i.content == "any update?" && i.tags.iter().any(|t| t == "task")));
    }
}
