//! Per-session layer snapshots.
//!
//! After every committed turn the state updater records the shape of each
//! layer (status, size, relevance) so the next turn and `get_layer` callers
//! can see what the previous window looked like without keeping the full
//! payloads around.

use crate::context::layer::{ContextWindow, LayerId, LayerStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strata_core::Result;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub session_id: String,
    pub layer_id: LayerId,
    pub status: LayerStatus,
    pub token_count: usize,
    pub relevance_score: f32,
    pub summarized: bool,
    pub captured_at: DateTime<Utc>,
}

impl LayerSnapshot {
    /// One snapshot per layer, in layer order.
    pub fn capture(window: &ContextWindow) -> Vec<Self> {
        let now = Utc::now();
        window
            .layers
            .iter()
            .map(|l| Self {
                session_id: window.session_id.clone(),
                layer_id: l.id,
                status: l.status,
                token_count: l.token_count,
                relevance_score: l.relevance_score,
                summarized: l.summarized,
                captured_at: now,
            })
            .collect()
    }
}

/// Where snapshots live between turns.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the session's snapshots.
    async fn save(&self, session_id: &str, snapshots: Vec<LayerSnapshot>) -> Result<()>;

    async fn load(&self, session_id: &str) -> Result<Vec<LayerSnapshot>>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    sessions: RwLock<HashMap<String, Vec<LayerSnapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, session_id: &str, snapshots: Vec<LayerSnapshot>) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), snapshots);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<LayerSnapshot>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::layer::{ContextLayer, LayerData, QueryData};

    fn window() -> ContextWindow {
        let layers = LayerId::ALL
            .iter()
            .map(|id| match id {
                LayerId::UserQuery => ContextLayer::active(
                    LayerData::UserQuery(QueryData {
                        text: "what changed?".into(),
                        ..Default::default()
                    }),
                    1.0,
                ),
                other => ContextLayer::inactive(*other, 0.0),
            })
            .collect();
        ContextWindow::new("s1", layers, 100)
    }

    #[test]
    fn capture_mirrors_every_layer() {
        let snaps = LayerSnapshot::capture(&window());
        assert_eq!(snaps.len(), 11);
        assert_eq!(snaps[10].layer_id, LayerId::UserQuery);
        assert_eq!(snaps[10].status, LayerStatus::Active);
        assert_eq!(snaps[10].token_count, 4);
        assert!(snaps.iter().all(|s| s.session_id == "s1"));
    }

    #[tokio::test]
    async fn save_replaces_and_clear_removes() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load("s1").await.unwrap().is_empty());

        store.save("s1", LayerSnapshot::capture(&window())).await.unwrap();
        let mut second = LayerSnapshot::capture(&window());
        second.truncate(3);
        store.save("s1", second).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap().len(), 3);

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());
    }
}
