//! Knowledge retrieval: embedding search over stored documents.
//!
//! Documents are split into paragraph-aligned chunks, each chunk embedded
//! once at insert time. A query is embedded with the same embedder and
//! compared by cosine similarity; chunks under the minimum score are dropped
//! and the top-k returned, best first. Chunks indexed by a fallback embedder
//! are re-embedded into the query's space before they are compared.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::Result;
use strata_core::provider::Embedder;
use strata_memory::cosine_similarity;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Target chunk size in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 800;

/// A retrieved knowledge chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Source document identifier.
    pub document_id: String,
    /// Sequential chunk index within the document.
    pub chunk_index: usize,
    /// The text content of this chunk.
    pub content: String,
    /// Human-readable source label (filename, URL, etc.).
    pub source: String,
    /// Cosine similarity to the query (0.0–1.0).
    pub similarity: f32,
}

/// Read-only access to a document store. Builders only ever call this.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize, min_score: f32)
    -> Result<Vec<KnowledgeChunk>>;
}

struct StoredChunk {
    chunk: KnowledgeChunk,
    embedding: Vec<f32>,
    space: String,
}

/// In-process document index.
pub struct InMemoryKnowledgeBase {
    embedder: Arc<dyn Embedder>,
    chunk_chars: usize,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryKnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    /// Chunk, embed and index a document. Returns its id.
    pub async fn add_document(&self, source: impl Into<String>, text: &str) -> Result<String> {
        let source = source.into();
        let document_id = Uuid::new_v4().to_string();
        let pieces = chunk_text(text, self.chunk_chars);
        if pieces.is_empty() {
            return Ok(document_id);
        }

        let embedded = self.embedder.embed_tagged(&pieces).await?;
        let space = embedded.space;
        let mut chunks = self.chunks.write().await;
        for (chunk_index, (content, embedding)) in pieces.into_iter().zip(embedded.vectors).enumerate() {
            chunks.push(StoredChunk {
                chunk: KnowledgeChunk {
                    document_id: document_id.clone(),
                    chunk_index,
                    content,
                    source: source.clone(),
                    similarity: 0.0,
                },
                embedding,
                space: space.clone(),
            });
        }
        debug!(source = %source, document_id = %document_id, "Indexed knowledge document");
        Ok(document_id)
    }

    /// Remove every chunk of a document. Returns how many were removed.
    pub async fn remove_document(&self, document_id: &str) -> usize {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|c| c.chunk.document_id != document_id);
        before - chunks.len()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeBase {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<KnowledgeChunk>> {
        let chunks = self.chunks.read().await;
        if chunks.is_empty() || top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let (space, query_embedding) = self.embedder.embed_one_tagged(query).await?;

        let stale: Vec<&StoredChunk> = chunks.iter().filter(|c| c.space != space).collect();
        let mut realigned: Vec<Vec<f32>> = Vec::new();
        if !stale.is_empty() {
            let texts: Vec<String> = stale.iter().map(|c| c.chunk.content.clone()).collect();
            match self.embedder.embed_tagged(&texts).await {
                Ok(embedded) if embedded.space == space => realigned = embedded.vectors,
                Ok(_) | Err(_) => {
                    warn!(space = %space, skipped = stale.len(), "Knowledge chunks from another embedding space skipped");
                }
            }
        }

        // Stable sort keeps insertion order among equal scores
        let mut realigned = realigned.into_iter();
        let mut scored: Vec<(f32, &KnowledgeChunk)> = chunks
            .iter()
            .filter_map(|c| {
                if c.space == space {
                    Some((cosine_similarity(&query_embedding, &c.embedding), &c.chunk))
                } else {
                    realigned
                        .next()
                        .map(|v| (cosine_similarity(&query_embedding, &v), &c.chunk))
                }
            })
            .filter(|(score, _)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| KnowledgeChunk {
                similarity: score,
                ..chunk.clone()
            })
            .collect())
    }
}

/// Split text into chunks of roughly `max_chars`, on paragraph boundaries
/// where possible and word boundaries otherwise.
fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in split_words(paragraph, max_chars) {
            let piece_len = piece.chars().count();
            if current_len > 0 && current_len + 2 + piece_len > max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push_str("\n\n");
                current_len += 2;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_words(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        let len = current.chars().count();
        if len > 0 && len + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
