//! File-based memory backend: persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `MemoryItem`. Storage location defaults to
//! `~/.strata/memory/memories.jsonl`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::error::MemoryError;
use strata_core::memory::{MemoryBackend, MemoryItem, MemoryTier};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed memory store using JSONL (one JSON object per line).
///
/// Items are loaded into memory on creation and flushed to disk on every
/// mutation (put, delete). This gives fast reads with durable writes.
pub struct FileBackend {
    path: PathBuf,
    items: Arc<RwLock<Vec<MemoryItem>>>,
}

impl FileBackend {
    /// Create a new file-based backend at the given path.
    ///
    /// If the file exists, items are loaded from it.
    /// If the file does not exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let items = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = items.len(), "File memory backend loaded");
        Self {
            path,
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<MemoryItem> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryItem>(line) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory item");
                    None
                }
            })
            .collect()
    }

    /// Write every item to disk as JSONL.
    async fn flush(&self) -> Result<(), MemoryError> {
        let items = self.items.read().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for item in items.iter() {
            let line = serde_json::to_string(item).map_err(|e| {
                MemoryError::Storage(format!("Failed to serialize memory item: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        drop(items);

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))
    }
}

#[async_trait]
impl MemoryBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, item: MemoryItem) -> Result<(), MemoryError> {
        {
            let mut items = self.items.write().await;
            match items
                .iter_mut()
                .find(|i| i.owner_id == item.owner_id && i.id == item.id)
            {
                Some(existing) => *existing = item,
                None => items.push(item),
            }
        }
        self.flush().await
    }

    async fn get(&self, owner_id: &str, id: &str) -> Result<Option<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .find(|i| i.owner_id == owner_id && i.id == id)
            .cloned())
    }

    async fn list(
        &self,
        owner_id: &str,
        tier: Option<MemoryTier>,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        let mut out: Vec<MemoryItem> = items
            .iter()
            .filter(|i| i.owner_id == owner_id && tier.is_none_or(|t| i.tier == t))
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }

    async fn delete(&self, owner_id: &str, ids: &[String]) -> Result<usize, MemoryError> {
        let removed = {
            let mut items = self.items.write().await;
            let before = items.len();
            items.retain(|i| !(i.owner_id == owner_id && ids.contains(&i.id)));
            before - items.len()
        };
        if removed > 0 {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn owners(&self) -> Result<Vec<String>, MemoryError> {
        let items = self.items.read().await;
        let mut owners: Vec<String> = items.iter().map(|i| i.owner_id.clone()).collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }
}
