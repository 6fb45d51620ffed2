//! Domain event system: decoupled observation of the engine.
//!
//! Events are published when an assembly finishes, a layer degrades, a reply
//! is generated or memory changes. Hosts subscribe to log, audit or meter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A context window was assembled for a session
    ContextAssembled {
        session_id: String,
        total_tokens: usize,
        active_layers: usize,
        relevance: f32,
        compressed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A layer builder failed or timed out and was marked inactive
    LayerDegraded {
        session_id: String,
        layer: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The generation backend produced a reply
    ResponseGenerated {
        session_id: String,
        model: String,
        provider: String,
        tokens_used: u32,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A memory item was written to a tier
    MemoryStored {
        owner_id: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// A memory item moved to the long tier
    MemoryPromoted {
        owner_id: String,
        item_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was reset
    SessionReset {
        session_id: String,
        memory_preserved: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
