//! Deterministic hash-based pseudo-embeddings.
//!
//! Each word is hashed with SHA-256 and scattered over a fixed number of
//! dimensions; the sum is L2-normalised. Texts that share words land close
//! together, which is enough for lexical nearest-neighbour search when no
//! embedding service is configured, and keeps tests hermetic.
//!
//! These vectors do not capture meaning beyond word overlap.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use strata_core::error::ProviderError;
use strata_core::provider::Embedder;
use strata_core::tool::query_words;

pub const DEFAULT_DIMENSIONS: usize = 256;

/// Slots each word writes into.
const SLOTS_PER_WORD: usize = 4;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(SLOTS_PER_WORD),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let words = query_words(text);
        if words.is_empty() {
            return None;
        }

        let mut v = vec![0.0f32; self.dimensions];
        for word in &words {
            let digest = Sha256::digest(word.as_bytes());
            for slot in 0..SLOTS_PER_WORD {
                let chunk = &digest[slot * 8..slot * 8 + 8];
                let idx = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize
                    % self.dimensions;
                let sign = if chunk[4] & 1 == 0 { 1.0 } else { -1.0 };
                v[idx] += sign;
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        v.iter_mut().for_each(|x| *x /= norm);
        Some(v)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn space(&self) -> String {
        format!("hashing/{}", self.dimensions)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts
            .iter()
            .map(|t| {
                self.embed_text(t).ok_or_else(|| ProviderError::InvalidEmbedding {
                    provider: "hashing".into(),
                    reason: "text has no words to embed".into(),
                })
            })
            .collect()
    }
}
