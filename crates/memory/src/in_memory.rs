//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::error::MemoryError;
use strata_core::memory::{MemoryBackend, MemoryItem, MemoryTier};
use tokio::sync::RwLock;

/// An in-memory backend that keeps each owner's items in insertion order.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryBackend {
    items: Arc<RwLock<HashMap<String, Vec<MemoryItem>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, item: MemoryItem) -> Result<(), MemoryError> {
        let mut items = self.items.write().await;
        let owned = items.entry(item.owner_id.clone()).or_default();
        match owned.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => owned.push(item),
        }
        Ok(())
    }

    async fn get(&self, owner_id: &str, id: &str) -> Result<Option<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        Ok(items
            .get(owner_id)
            .and_then(|owned| owned.iter().find(|i| i.id == id).cloned()))
    }

    async fn list(
        &self,
        owner_id: &str,
        tier: Option<MemoryTier>,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        let Some(owned) = items.get(owner_id) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<MemoryItem> = owned
            .iter()
            .filter(|i| tier.is_none_or(|t| i.tier == t))
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }

    async fn delete(&self, owner_id: &str, ids: &[String]) -> Result<usize, MemoryError> {
        let mut items = self.items.write().await;
        let Some(owned) = items.get_mut(owner_id) else {
            return Ok(0);
        };
        let before = owned.len();
        owned.retain(|i| !ids.contains(&i.id));
        let removed = before - owned.len();
        if owned.is_empty() {
            items.remove(owner_id);
        }
        Ok(removed)
    }

    async fn owners(&self) -> Result<Vec<String>, MemoryError> {
        let mut owners: Vec<String> = self.items.read().await.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(owner: &str, id: &str, tier: MemoryTier, content: &str) -> MemoryItem {
        MemoryItem {
            id: id.into(),
            owner_id: owner.into(),
            session_id: None,
            tier,
            content: content.into(),
            content_hash: String::new(),
            tags: vec![],
            embedding: None,
            embedding_space: None,
            relevance_score: 0.0,
            access_count: 0,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn put_and_get() {
        let mem = InMemoryBackend::new();
        mem.put(item("alice", "1", MemoryTier::Long, "Rust is a systems language"))
            .await
            .unwrap();

        let found = mem.get("alice", "1").await.unwrap();
        assert_eq!(found.unwrap().content, "Rust is a systems language");
        assert!(mem.get("bob", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_is_upsert() {
        let mem = InMemoryBackend::new();
        mem.put(item("alice", "1", MemoryTier::Medium, "v1")).await.unwrap();
        mem.put(item("alice", "1", MemoryTier::Long, "v2")).await.unwrap();

        assert_eq!(mem.count("alice", None).await.unwrap(), 1);
        let found = mem.get("alice", "1").await.unwrap().unwrap();
        assert_eq!(found.content, "v2");
        assert_eq!(found.tier, MemoryTier::Long);
    }

    #[tokio::test]
    async fn list_filters_by_tier_and_owner() {
        let mem = InMemoryBackend::new();
        mem.put(item("alice", "1", MemoryTier::Short, "a")).await.unwrap();
        mem.put(item("alice", "2", MemoryTier::Long, "b")).await.unwrap();
        mem.put(item("bob", "3", MemoryTier::Short, "c")).await.unwrap();

        assert_eq!(mem.list("alice", None).await.unwrap().len(), 2);
        assert_eq!(mem.list("alice", Some(MemoryTier::Short)).await.unwrap().len(), 1);
        assert_eq!(mem.owners().await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn delete_batch() {
        let mem = InMemoryBackend::new();
        mem.put(item("alice", "1", MemoryTier::Short, "a")).await.unwrap();
        mem.put(item("alice", "2", MemoryTier::Short, "b")).await.unwrap();

        let removed = mem
            .delete("alice", &["1".to_string(), "2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(mem.owners().await.unwrap().is_empty());
    }
}
