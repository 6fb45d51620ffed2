//! Tiered memory: retention and retrieval policy on top of a backend.
//!
//! Every observation lands in the short tier. The medium tier takes it when
//! the retention policy calls it significant, the long tier when it is
//! persistence-worthy and an embedding could be produced. Long-tier
//! candidates whose embedding failed wait in a per-owner queue and are
//! retried on the owner's next significant observation.
//!
//! Retrieval blends recency with semantic similarity, deduplicates by
//! content hash and truncates. It never writes; access bookkeeping happens
//! through [`TieredMemory::touch`] at commit time.
//!
//! Every stored vector is tagged with the embedding space that produced it.
//! Vectors are only compared within one space: when a fallback embedder
//! answered for some items, retrieval re-embeds them into the query's space
//! on the fly, and the next observation rewrites them into the preferred
//! space for good.

use crate::retention::{HeuristicRetention, RetentionPolicy};
use crate::vector::{cosine_similarity, vector_search};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use strata_core::error::MemoryError;
use strata_core::event::{DomainEvent, EventBus};
use strata_core::memory::{MemoryBackend, MemoryItem, MemoryTier};
use strata_core::provider::Embedder;
use strata_core::tool::query_words;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deferred long-tier candidates kept per owner.
const PENDING_PER_OWNER: usize = 32;

/// Tier sizes, lifetimes and scoring weights.
#[derive(Debug, Clone)]
pub struct TierSettings {
    pub short_capacity: usize,
    pub short_ttl: Duration,
    pub medium_ttl: Duration,
    pub long_cap_per_owner: usize,
    pub recency_window_secs: f64,
    pub recency_weight: f32,
    pub similarity_weight: f32,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            short_capacity: 10,
            short_ttl: Duration::hours(1),
            medium_ttl: Duration::hours(24),
            long_cap_per_owner: 500,
            recency_window_secs: 3_600.0,
            recency_weight: 0.5,
            similarity_weight: 0.5,
        }
    }
}

/// SHA-256 (hex) of the whitespace-normalised, lowercased content.
pub fn content_hash(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Recency in (0, 1]: 1.0 for brand-new items, 0.5 at one window of age.
pub fn recency_score(created_at: DateTime<Utc>, now: DateTime<Utc>, window_secs: f64) -> f32 {
    let age_secs = (now - created_at).num_milliseconds().max(0) as f64 / 1_000.0;
    (1.0 / (1.0 + age_secs / window_secs.max(1.0))) as f32
}

/// Something the user said or did, offered to the memory tiers.
#[derive(Debug, Clone)]
pub struct Observation {
    pub owner_id: String,
    pub session_id: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
}

impl Observation {
    pub fn new(owner_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            session_id: None,
            content: content.into(),
            tags: Vec::new(),
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// What happened to a single-tier store.
#[derive(Debug, Clone)]
pub enum StoreDecision {
    Stored(MemoryItem),
    /// The tier's predicate rejected the observation.
    Skipped,
    /// Long-tier candidate queued because no embedding could be produced.
    Deferred,
}

impl StoreDecision {
    pub fn item(&self) -> Option<&MemoryItem> {
        match self {
            Self::Stored(item) => Some(item),
            _ => None,
        }
    }
}

/// Per-tier result of [`TieredMemory::observe`].
#[derive(Debug, Clone, Default)]
pub struct ObserveOutcome {
    pub short: Option<String>,
    pub medium: Option<String>,
    pub long: Option<String>,
    pub deferred: bool,
    /// Previously deferred candidates that made it into the long tier.
    pub retried: usize,
    /// Long items moved into the embedder's preferred space.
    pub reembedded: usize,
}

/// A retrieved item with the components of its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub item: MemoryItem,
    pub recency: f32,
    pub similarity: f32,
    pub score: f32,
}

/// The memory system: three tiers over one [`MemoryBackend`].
pub struct TieredMemory {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn Embedder>,
    policy: Arc<dyn RetentionPolicy>,
    settings: TierSettings,
    pending: Mutex<HashMap<String, VecDeque<Observation>>>,
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: Option<Arc<EventBus>>,
}

impl TieredMemory {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn Embedder>,
        settings: TierSettings,
    ) -> Self {
        Self {
            backend,
            embedder,
            policy: Arc::new(HeuristicRetention::default()),
            settings,
            pending: Mutex::new(HashMap::new()),
            owner_locks: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RetentionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &TierSettings {
        &self.settings
    }

    /// Store an observation into one tier, subject to that tier's predicate.
    pub async fn store(
        &self,
        observation: &Observation,
        tier: MemoryTier,
    ) -> Result<StoreDecision, MemoryError> {
        let lock = self.owner_lock(&observation.owner_id).await;
        let _guard = lock.lock().await;
        let now = Utc::now();
        match tier {
            MemoryTier::Short => self.store_short(observation, now).await.map(StoreDecision::Stored),
            MemoryTier::Medium => self.store_medium(observation, now).await,
            MemoryTier::Long => self.store_long(observation, now).await,
        }
    }

    /// Offer an observation to every tier in turn.
    ///
    /// Only a short-tier or medium-tier backend failure is returned as an
    /// error; long-tier problems are logged and reported in the outcome.
    pub async fn observe(&self, observation: &Observation) -> Result<ObserveOutcome, MemoryError> {
        let lock = self.owner_lock(&observation.owner_id).await;
        let _guard = lock.lock().await;
        let now = Utc::now();
        let mut outcome = ObserveOutcome {
            short: Some(self.store_short(observation, now).await?.id),
            ..Default::default()
        };

        if let StoreDecision::Stored(item) = self.store_medium(observation, now).await? {
            outcome.medium = Some(item.id);
            outcome.retried = self.retry_pending(&observation.owner_id, now).await;
        }

        match self.store_long(observation, now).await {
            Ok(StoreDecision::Stored(item)) => outcome.long = Some(item.id),
            Ok(StoreDecision::Deferred) => outcome.deferred = true,
            Ok(StoreDecision::Skipped) => {}
            Err(e) => warn!(owner_id = %observation.owner_id, error = %e, "Long-tier store failed"),
        }

        match self.reembed_stale(&observation.owner_id).await {
            Ok(n) => outcome.reembedded = n,
            Err(e) => warn!(owner_id = %observation.owner_id, error = %e, "Re-embedding stale long items failed"),
        }

        debug!(
            owner_id = %observation.owner_id,
            medium = outcome.medium.is_some(),
            long = outcome.long.is_some(),
            deferred = outcome.deferred,
            "Observation stored"
        );
        Ok(outcome)
    }

    /// Blend of short, medium and long retrieval for one owner.
    ///
    /// Short: every live item. Medium: keyword matches, or the most recent
    /// items when nothing matches. Long: cosine nearest neighbours. Results
    /// are ranked by the recency/similarity blend, deduplicated by content
    /// hash, and truncated to `limit`.
    pub async fn retrieve(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let now = Utc::now();
        let items = self.live_items(owner_id, None, now).await?;
        let query_embedding = self.embed_query(query, &items).await;
        let items = self.align(items, query_embedding.as_ref().map(|(space, _)| space.as_str())).await;
        let query_embedding = query_embedding.map(|(_, v)| v);
        let words = query_words(query);

        let mut candidates: Vec<&MemoryItem> =
            items.iter().filter(|i| i.tier == MemoryTier::Short).collect();

        let medium: Vec<&MemoryItem> = items.iter().filter(|i| i.tier == MemoryTier::Medium).collect();
        let matched: Vec<&MemoryItem> = medium
            .iter()
            .copied()
            .filter(|i| keyword_hits(&i.content, &words) > 0)
            .collect();
        if matched.is_empty() {
            candidates.extend(medium.iter().rev().take(limit));
        } else {
            candidates.extend(matched);
        }

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|i| self.score(i, now, query_embedding.as_deref()))
            .collect();

        if let Some(qe) = &query_embedding {
            let long: Vec<MemoryItem> = items
                .iter()
                .filter(|i| i.tier == MemoryTier::Long)
                .cloned()
                .collect();
            for (_, item) in vector_search(&long, qe, limit, 0.0) {
                scored.push(self.score(&item, now, Some(qe)));
            }
        }

        Ok(rank(scored, limit))
    }

    /// Search a single tier, or all tiers when `tier` is `None`.
    ///
    /// Unlike [`retrieve`](Self::retrieve), only items that share a word
    /// with the query or have positive similarity to it are returned.
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        tier: Option<MemoryTier>,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let now = Utc::now();
        let items = self.live_items(owner_id, tier, now).await?;
        let query_embedding = self.embed_query(query, &items).await;
        let items = self.align(items, query_embedding.as_ref().map(|(space, _)| space.as_str())).await;
        let query_embedding = query_embedding.map(|(_, v)| v);
        let words = query_words(query);

        let scored = items
            .iter()
            .map(|i| (keyword_hits(&i.content, &words), self.score(i, now, query_embedding.as_deref())))
            .filter(|(hits, s)| words.is_empty() || *hits > 0 || s.similarity > 0.0)
            .map(|(_, s)| s)
            .collect();

        Ok(rank(scored, limit))
    }

    /// Record that items were used: bump access counts and refresh LRU order.
    pub async fn touch(&self, owner_id: &str, ids: &[String]) -> Result<(), MemoryError> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        let now = Utc::now();
        for id in ids {
            if let Some(mut item) = self.backend.get(owner_id, id).await? {
                item.access_count = item.access_count.saturating_add(1);
                item.last_accessed_at = now;
                self.backend.put(item).await?;
            }
        }
        Ok(())
    }

    /// Drop every item whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, MemoryError> {
        let mut removed = 0;
        for owner in self.backend.owners().await? {
            let lock = self.owner_lock(&owner).await;
            let _guard = lock.lock().await;
            let expired: Vec<String> = self
                .backend
                .list(&owner, None)
                .await?
                .into_iter()
                .filter(|i| i.is_expired(now))
                .map(|i| i.id)
                .collect();
            if !expired.is_empty() {
                removed += self.backend.delete(&owner, &expired).await?;
            }
        }
        if removed > 0 {
            info!(removed, "Purged expired memory items");
        }
        Ok(removed)
    }

    /// Clear the short and medium items a session produced.
    pub async fn end_session(&self, owner_id: &str, session_id: &str) -> Result<usize, MemoryError> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;
        let ids: Vec<String> = self
            .backend
            .list(owner_id, None)
            .await?
            .into_iter()
            .filter(|i| i.tier != MemoryTier::Long && i.session_id.as_deref() == Some(session_id))
            .map(|i| i.id)
            .collect();
        let removed = self.backend.delete(owner_id, &ids).await?;
        info!(owner_id, session_id, removed, "Session memory cleared");
        Ok(removed)
    }

    /// Move a medium item into the long tier.
    pub async fn promote(&self, owner_id: &str, id: &str) -> Result<MemoryItem, MemoryError> {
        let lock = self.owner_lock(owner_id).await;
        let _guard = lock.lock().await;

        let mut item = self
            .backend
            .get(owner_id, id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        match item.tier {
            MemoryTier::Long => return Ok(item),
            MemoryTier::Short => {
                return Err(MemoryError::PromotionRejected {
                    id: id.to_string(),
                    reason: "only medium items can be promoted".into(),
                });
            }
            MemoryTier::Medium => {}
        }

        let (space, embedding) = self
            .embedder
            .embed_one_tagged(&item.content)
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        let existing = self.backend.list(owner_id, Some(MemoryTier::Long)).await?;
        if existing.iter().any(|i| i.content_hash == item.content_hash)
            || self.policy.is_redundant(&embedding, &same_space(&existing, &space))
        {
            return Err(MemoryError::PromotionRejected {
                id: id.to_string(),
                reason: "duplicates an existing long-term memory".into(),
            });
        }

        item.tier = MemoryTier::Long;
        item.expires_at = None;
        item.embedding = Some(embedding);
        item.embedding_space = Some(space);
        self.backend.put(item.clone()).await?;
        self.enforce_long_cap(owner_id).await?;

        info!(owner_id, item_id = id, "Memory promoted to long tier");
        self.publish(DomainEvent::MemoryPromoted {
            owner_id: owner_id.to_string(),
            item_id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(item)
    }

    /// Deferred long-tier candidates waiting for an owner.
    pub async fn pending_count(&self, owner_id: &str) -> usize {
        self.pending.lock().await.get(owner_id).map_or(0, VecDeque::len)
    }

    // ---- internals (callers hold the owner lock) ----

    async fn store_short(&self, obs: &Observation, now: DateTime<Utc>) -> Result<MemoryItem, MemoryError> {
        let item = new_item(obs, MemoryTier::Short, now, Some(now + self.settings.short_ttl), None);
        self.backend.put(item.clone()).await?;

        let shorts = self.backend.list(&obs.owner_id, Some(MemoryTier::Short)).await?;
        let capacity = self.settings.short_capacity.max(1);
        if shorts.len() > capacity {
            let evict: Vec<String> = shorts
                .iter()
                .take(shorts.len() - capacity)
                .map(|i| i.id.clone())
                .collect();
            self.backend.delete(&obs.owner_id, &evict).await?;
        }

        self.stored(&obs.owner_id, MemoryTier::Short);
        Ok(item)
    }

    async fn store_medium(&self, obs: &Observation, now: DateTime<Utc>) -> Result<StoreDecision, MemoryError> {
        if !self.policy.is_significant(&obs.content, &obs.tags) {
            return Ok(StoreDecision::Skipped);
        }
        let item = new_item(obs, MemoryTier::Medium, now, Some(now + self.settings.medium_ttl), None);
        self.backend.put(item.clone()).await?;
        self.stored(&obs.owner_id, MemoryTier::Medium);
        Ok(StoreDecision::Stored(item))
    }

    async fn store_long(&self, obs: &Observation, now: DateTime<Utc>) -> Result<StoreDecision, MemoryError> {
        let hash = content_hash(&obs.content);
        let existing = self.backend.list(&obs.owner_id, Some(MemoryTier::Long)).await?;
        if !self.policy.is_long_candidate(&obs.content, &hash, &existing) {
            return Ok(StoreDecision::Skipped);
        }

        let (space, embedding) = match self.embedder.embed_one_tagged(&obs.content).await {
            Ok(tagged) => tagged,
            Err(e) => {
                warn!(
                    owner_id = %obs.owner_id,
                    embedder = self.embedder.name(),
                    error = %e,
                    "Embedding failed, long-tier promotion deferred"
                );
                self.defer(obs.clone()).await;
                return Ok(StoreDecision::Deferred);
            }
        };

        if self.policy.is_redundant(&embedding, &same_space(&existing, &space)) {
            debug!(owner_id = %obs.owner_id, "Near-duplicate of a long-tier item, skipped");
            return Ok(StoreDecision::Skipped);
        }

        let item = new_item(obs, MemoryTier::Long, now, None, Some((space, embedding)));
        self.backend.put(item.clone()).await?;
        self.enforce_long_cap(&obs.owner_id).await?;
        self.stored(&obs.owner_id, MemoryTier::Long);
        Ok(StoreDecision::Stored(item))
    }

    async fn retry_pending(&self, owner_id: &str, now: DateTime<Utc>) -> usize {
        let queued = self
            .pending
            .lock()
            .await
            .remove(owner_id)
            .unwrap_or_default();
        if queued.is_empty() {
            return 0;
        }

        let mut promoted = 0;
        for obs in queued {
            match self.store_long(&obs, now).await {
                Ok(StoreDecision::Stored(_)) => promoted += 1,
                Ok(_) => {}
                Err(e) => warn!(owner_id, error = %e, "Deferred long-tier store failed"),
            }
        }
        if promoted > 0 {
            info!(owner_id, promoted, "Deferred memories promoted to long tier");
        }
        promoted
    }

    async fn defer(&self, obs: Observation) {
        let mut pending = self.pending.lock().await;
        let queue = pending.entry(obs.owner_id.clone()).or_default();
        let hash = content_hash(&obs.content);
        if queue.iter().any(|q| content_hash(&q.content) == hash) {
            return;
        }
        queue.push_back(obs);
        while queue.len() > PENDING_PER_OWNER {
            queue.pop_front();
        }
    }

    async fn enforce_long_cap(&self, owner_id: &str) -> Result<(), MemoryError> {
        let mut long = self.backend.list(owner_id, Some(MemoryTier::Long)).await?;
        let cap = self.settings.long_cap_per_owner;
        if long.len() <= cap {
            return Ok(());
        }
        long.sort_by_key(|i| (i.last_accessed_at, i.created_at));
        let evict: Vec<String> = long.iter().take(long.len() - cap).map(|i| i.id.clone()).collect();
        let removed = self.backend.delete(owner_id, &evict).await?;
        info!(owner_id, removed, cap, "Long tier over capacity, evicted least recently used");
        Ok(())
    }

    async fn live_items(
        &self,
        owner_id: &str,
        tier: Option<MemoryTier>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        Ok(self
            .backend
            .list(owner_id, tier)
            .await?
            .into_iter()
            .filter(|i| !i.is_expired(now))
            .collect())
    }

    /// Embed the query only when some candidate can be compared against it.
    async fn embed_query(&self, query: &str, items: &[MemoryItem]) -> Option<(String, Vec<f32>)> {
        if query.trim().is_empty() || !items.iter().any(|i| i.embedding.is_some()) {
            return None;
        }
        match self.embedder.embed_one_tagged(query).await {
            Ok(tagged) => Some(tagged),
            Err(e) => {
                warn!(embedder = self.embedder.name(), error = %e, "Query embedding failed, semantic ranking skipped");
                None
            }
        }
    }

    /// Bring every embedded item into `space` for this read only.
    ///
    /// Items from another space are re-embedded in one batch; if that lands
    /// in a different space again, their vectors are dropped from the copy
    /// so they rank on recency alone.
    async fn align(&self, mut items: Vec<MemoryItem>, space: Option<&str>) -> Vec<MemoryItem> {
        let Some(space) = space else {
            return items;
        };
        let stale: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.embedding.is_some() && i.embedding_space.as_deref() != Some(space))
            .map(|(idx, _)| idx)
            .collect();
        if stale.is_empty() {
            return items;
        }

        let texts: Vec<String> = stale.iter().map(|&idx| items[idx].content.clone()).collect();
        let vectors = match self.embedder.embed_tagged(&texts).await {
            Ok(embedded) if embedded.space == space => Some(embedded.vectors),
            Ok(embedded) => {
                debug!(query_space = space, got = %embedded.space, "Re-embedding landed in another space");
                None
            }
            Err(e) => {
                warn!(embedder = self.embedder.name(), error = %e, "Re-embedding for retrieval failed");
                None
            }
        };

        match vectors {
            Some(vectors) => {
                for (idx, vector) in stale.into_iter().zip(vectors) {
                    items[idx].embedding = Some(vector);
                    items[idx].embedding_space = Some(space.to_string());
                }
            }
            None => {
                for idx in stale {
                    items[idx].embedding = None;
                }
            }
        }
        items
    }

    /// Rewrite long items embedded outside the preferred space, once the
    /// preferred embedder answers again. Caller holds the owner lock.
    async fn reembed_stale(&self, owner_id: &str) -> Result<usize, MemoryError> {
        let preferred = self.embedder.space();
        let stale: Vec<MemoryItem> = self
            .backend
            .list(owner_id, Some(MemoryTier::Long))
            .await?
            .into_iter()
            .filter(|i| i.embedding_space.as_deref() != Some(preferred.as_str()))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = stale.iter().map(|i| i.content.clone()).collect();
        let embedded = match self.embedder.embed_tagged(&texts).await {
            Ok(embedded) if embedded.space == preferred => embedded,
            Ok(_) => return Ok(0),
            Err(e) => {
                debug!(owner_id, error = %e, "Preferred embedder still unavailable");
                return Ok(0);
            }
        };

        let count = stale.len();
        for (mut item, vector) in stale.into_iter().zip(embedded.vectors) {
            item.embedding = Some(vector);
            item.embedding_space = Some(preferred.clone());
            self.backend.put(item).await?;
        }
        info!(owner_id, count, space = %preferred, "Long items re-embedded into preferred space");
        Ok(count)
    }

    fn score(&self, item: &MemoryItem, now: DateTime<Utc>, query_embedding: Option<&[f32]>) -> ScoredMemory {
        let recency = recency_score(item.created_at, now, self.settings.recency_window_secs);
        let similarity = match (item.embedding.as_deref(), query_embedding) {
            (Some(e), Some(q)) => cosine_similarity(e, q).max(0.0),
            _ => 0.0,
        };
        let weights = self.settings.recency_weight + self.settings.similarity_weight;
        let blended = if weights > 0.0 {
            (self.settings.recency_weight * recency + self.settings.similarity_weight * similarity) / weights
        } else {
            0.0
        };
        let score = blended.clamp(0.0, 1.0);
        let mut item = item.clone();
        item.relevance_score = score;
        ScoredMemory {
            item,
            recency,
            similarity,
            score,
        }
    }

    async fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().await;
        locks.entry(owner_id.to_string()).or_default().clone()
    }

    fn stored(&self, owner_id: &str, tier: MemoryTier) {
        self.publish(DomainEvent::MemoryStored {
            owner_id: owner_id.to_string(),
            tier: tier.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

fn new_item(
    obs: &Observation,
    tier: MemoryTier,
    now: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    embedding: Option<(String, Vec<f32>)>,
) -> MemoryItem {
    let (embedding_space, embedding) = match embedding {
        Some((space, vector)) => (Some(space), Some(vector)),
        None => (None, None),
    };
    MemoryItem {
        id: Uuid::new_v4().to_string(),
        owner_id: obs.owner_id.clone(),
        session_id: obs.session_id.clone(),
        tier,
        content: obs.content.clone(),
        content_hash: content_hash(&obs.content),
        tags: obs.tags.clone(),
        embedding,
        embedding_space,
        relevance_score: 0.0,
        access_count: 0,
        created_at: now,
        last_accessed_at: now,
        expires_at,
    }
}

/// Long items whose vectors can be compared with one from `space`.
fn same_space(items: &[MemoryItem], space: &str) -> Vec<MemoryItem> {
    items
        .iter()
        .filter(|i| i.embedding_space.as_deref() == Some(space))
        .cloned()
        .collect()
}

fn keyword_hits(content: &str, words: &[String]) -> usize {
    if words.is_empty() {
        return 0;
    }
    let content_words: HashSet<String> = query_words(content).into_iter().collect();
    words.iter().filter(|w| content_words.contains(*w)).count()
}

/// Sort by score (newest first on ties), keep the best item per content hash.
fn rank(mut scored: Vec<ScoredMemory>, limit: usize) -> Vec<ScoredMemory> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.item.created_at.cmp(&a.item.created_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    let mut seen = HashSet::new();
    scored.retain(|s| seen.insert(s.item.content_hash.clone()));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use strata_core::error::ProviderError;
    use strata_core::provider::Embedded;

    /// Bag-of-words embedder with a switch to simulate outages.
    struct WordEmbedder {
        down: AtomicBool,
    }

    impl WordEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                down: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Embedder for WordEmbedder {
        fn name(&self) -> &str {
            "words"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ProviderError::Network("embedding service down".into()));
            }
            Ok(texts.iter().map(|t| bag_of_words(t, 64)).collect())
        }
    }

    fn bag_of_words(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for w in query_words(text) {
            let idx = w
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
                % dims;
            v[idx] += 1.0;
        }
        v
    }

    /// Preferred "words" space with a smaller "backup" space answering
    /// while the preferred one is down, like a primary/secondary chain.
    struct TwoSpaceEmbedder {
        primary_down: AtomicBool,
    }

    #[async_trait]
    impl Embedder for TwoSpaceEmbedder {
        fn name(&self) -> &str {
            "chain"
        }

        fn space(&self) -> String {
            "words".into()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(self.embed_tagged(texts).await?.vectors)
        }

        async fn embed_tagged(&self, texts: &[String]) -> Result<Embedded, ProviderError> {
            let (space, dims) = if self.primary_down.load(Ordering::SeqCst) {
                ("backup", 16)
            } else {
                ("words", 64)
            };
            Ok(Embedded {
                space: space.into(),
                vectors: texts.iter().map(|t| bag_of_words(t, dims)).collect(),
            })
        }
    }

    fn memory(embedder: Arc<WordEmbedder>, settings: TierSettings) -> TieredMemory {
        TieredMemory::new(Arc::new(InMemoryBackend::new()), embedder, settings)
    }

    /// A long, single-topic observation (one distinct word repeated).
    fn long_text(topic: &str) -> String {
        format!("{topic} ").repeat(12).trim_end().to_string()
    }

    #[tokio::test]
    async fn short_tier_is_a_ring_buffer() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        for i in 0..12 {
            let obs = Observation::new("alice", format!("msg {i}"));
            mem.store(&obs, MemoryTier::Short).await.unwrap();
        }
        let shorts = mem.backend().list("alice", Some(MemoryTier::Short)).await.unwrap();
        assert_eq!(shorts.len(), 10);
        assert_eq!(shorts[0].content, "msg 2");
        assert!(shorts.iter().all(|i| i.expires_at.is_some()));
    }

    #[tokio::test]
    async fn small_talk_stays_in_short_tier() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let outcome = mem.observe(&Observation::new("alice", "hi")).await.unwrap();
        assert!(outcome.short.is_some());
        assert!(outcome.medium.is_none());
        assert!(outcome.long.is_none());
        assert!(!outcome.deferred);
    }

    #[tokio::test]
    async fn long_round_trip_has_unit_similarity() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let content = long_text("kayaking");
        let outcome = mem.observe(&Observation::new("alice", content.clone())).await.unwrap();
        assert!(outcome.medium.is_some());
        let long_id = outcome.long.expect("long item stored");

        let hits = mem.search(&content, "alice", Some(MemoryTier::Long), 3).await.unwrap();
        assert_eq!(hits[0].item.id, long_id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits[0].item.embedding.is_some());
        assert!(hits[0].item.expires_at.is_none());
    }

    #[tokio::test]
    async fn fallback_space_round_trips_after_recovery() {
        let embedder = Arc::new(TwoSpaceEmbedder {
            primary_down: AtomicBool::new(true),
        });
        let mem = TieredMemory::new(Arc::new(InMemoryBackend::new()), embedder.clone(), TierSettings::default());
        let content = long_text("kayaking");

        let outcome = mem.observe(&Observation::new("alice", content.clone())).await.unwrap();
        let long_id = outcome.long.expect("stored through the backup space");
        let stored = mem.backend().get("alice", &long_id).await.unwrap().unwrap();
        assert_eq!(stored.embedding_space.as_deref(), Some("backup"));
        assert_eq!(stored.embedding.as_ref().map(Vec::len), Some(16));

        embedder.primary_down.store(false, Ordering::SeqCst);
        let hits = mem.search(&content, "alice", Some(MemoryTier::Long), 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, long_id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);

        // Reads never write; the next observation migrates the vector.
        let stored = mem.backend().get("alice", &long_id).await.unwrap().unwrap();
        assert_eq!(stored.embedding_space.as_deref(), Some("backup"));
        let outcome = mem.observe(&Observation::new("alice", "hi")).await.unwrap();
        assert_eq!(outcome.reembedded, 1);
        let stored = mem.backend().get("alice", &long_id).await.unwrap().unwrap();
        assert_eq!(stored.embedding_space.as_deref(), Some("words"));
        assert_eq!(stored.embedding.as_ref().map(Vec::len), Some(64));
    }

    #[tokio::test]
    async fn near_duplicates_in_the_same_space_are_skipped() {
        let embedder = Arc::new(TwoSpaceEmbedder {
            primary_down: AtomicBool::new(false),
        });
        let mem = TieredMemory::new(Arc::new(InMemoryBackend::new()), embedder.clone(), TierSettings::default());
        let first = format!("{} today", long_text("astronomy"));
        let near = format!("{} tonight", long_text("astronomy"));

        assert!(mem.observe(&Observation::new("alice", first)).await.unwrap().long.is_some());
        // Same words, different hash: redundant in the same space.
        assert!(mem.observe(&Observation::new("alice", near)).await.unwrap().long.is_none());
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Long)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exact_duplicates_are_not_persisted_twice() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let content = long_text("astronomy");
        mem.observe(&Observation::new("alice", content.clone())).await.unwrap();
        let second = mem.observe(&Observation::new("alice", content.to_uppercase())).await.unwrap();
        assert!(second.long.is_none());
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Long)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_defers_then_retries() {
        let embedder = WordEmbedder::new();
        let mem = memory(embedder.clone(), TierSettings::default());

        embedder.down.store(true, Ordering::SeqCst);
        let outcome = mem.observe(&Observation::new("alice", long_text("woodworking"))).await.unwrap();
        assert!(outcome.short.is_some());
        assert!(outcome.medium.is_some());
        assert!(outcome.deferred);
        assert_eq!(mem.pending_count("alice").await, 1);
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Long)).await.unwrap(), 0);

        embedder.down.store(false, Ordering::SeqCst);
        let outcome = mem
            .observe(&Observation::new("alice", "please remember the task list"))
            .await
            .unwrap();
        assert_eq!(outcome.retried, 1);
        assert_eq!(mem.pending_count("alice").await, 0);
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Long)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retrieve_dedupes_by_content_hash() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let content = long_text("gardening");
        mem.observe(&Observation::new("alice", content.clone())).await.unwrap();
        assert_eq!(mem.backend().count("alice", None).await.unwrap(), 3);

        let hits = mem.retrieve(&content, "alice", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.tier, MemoryTier::Long);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn retrieve_truncates_and_orders_by_score() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        for i in 0..6 {
            mem.observe(&Observation::new("alice", format!("note {i}"))).await.unwrap();
        }
        let hits = mem.retrieve("anything", "alice", 4).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn end_session_keeps_long_tier() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let obs = Observation::new("alice", long_text("cycling")).session("s1");
        mem.observe(&obs).await.unwrap();
        mem.observe(&Observation::new("alice", "other session").session("s2"))
            .await
            .unwrap();

        let removed = mem.end_session("alice", "s1").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Long)).await.unwrap(), 1);
        assert_eq!(mem.backend().count("alice", Some(MemoryTier::Short)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_items_are_hidden_and_purged() {
        let settings = TierSettings {
            short_ttl: Duration::zero(),
            ..TierSettings::default()
        };
        let mem = memory(WordEmbedder::new(), settings);
        mem.observe(&Observation::new("alice", "hi")).await.unwrap();

        assert!(mem.retrieve("hi", "alice", 5).await.unwrap().is_empty());
        assert_eq!(mem.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(mem.backend().count("alice", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn long_tier_evicts_least_recently_used() {
        let settings = TierSettings {
            long_cap_per_owner: 2,
            ..TierSettings::default()
        };
        let mem = memory(WordEmbedder::new(), settings);
        let first = mem.observe(&Observation::new("alice", long_text("kayaking"))).await.unwrap();
        let second = mem.observe(&Observation::new("alice", long_text("astronomy"))).await.unwrap();

        // Touching the first makes the second the eviction candidate.
        mem.touch("alice", &[first.long.clone().unwrap()]).await.unwrap();
        mem.observe(&Observation::new("alice", long_text("woodworking"))).await.unwrap();

        let long = mem.backend().list("alice", Some(MemoryTier::Long)).await.unwrap();
        assert_eq!(long.len(), 2);
        assert!(long.iter().any(|i| Some(&i.id) == first.long.as_ref()));
        assert!(!long.iter().any(|i| Some(&i.id) == second.long.as_ref()));
    }

    #[tokio::test]
    async fn promote_medium_item() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let obs = Observation::new("alice", "the quarterly report file is due friday");
        let StoreDecision::Stored(item) = mem.store(&obs, MemoryTier::Medium).await.unwrap() else {
            panic!("expected medium store");
        };

        let promoted = mem.promote("alice", &item.id).await.unwrap();
        assert_eq!(promoted.tier, MemoryTier::Long);
        assert!(promoted.expires_at.is_none());
        assert!(promoted.embedding.is_some());
    }

    #[tokio::test]
    async fn promote_rejects_short_and_unknown() {
        let mem = memory(WordEmbedder::new(), TierSettings::default());
        let StoreDecision::Stored(item) = mem
            .store(&Observation::new("alice", "hi"), MemoryTier::Short)
            .await
            .unwrap()
        else {
            panic!("expected short store");
        };
        assert!(matches!(
            mem.promote("alice", &item.id).await,
            Err(MemoryError::PromotionRejected { .. })
        ));
        assert!(matches!(
            mem.promote("alice", "missing").await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn content_hash_normalizes_whitespace_and_case() {
        assert_eq!(content_hash("Hello   World"), content_hash(" hello world "));
        assert_ne!(content_hash("hello"), content_hash("world"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn recency_halves_at_one_window() {
        let now = Utc::now();
        assert!((recency_score(now, now, 3_600.0) - 1.0).abs() < 1e-6);
        let hour_ago = now - Duration::hours(1);
        assert!((recency_score(hour_ago, now, 3_600.0) - 0.5).abs() < 1e-3);
    }
}
