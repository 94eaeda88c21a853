//! Feature-hashing embedder.

use async_trait::async_trait;
use tracing::debug;

use sqlvec_core::{Embedder, Result, VecError};

use crate::{l2_normalize, stable_hash};

/// Embeds text as an L2-normalized, signed bag of hashed words.
///
/// Each lowercase alphanumeric token is hashed to a slot and a sign; the
/// vector is the sum over tokens. Texts with no tokens embed to the zero
/// vector, which similarity search skips.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty());

        for token in tokens {
            let hash = stable_hash(token.to_lowercase().as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        l2_normalize(vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            return Err(VecError::embedding("dimension must be positive"));
        }
        debug!("Hashing {} texts into {} dimensions", texts.len(), self.dimension);
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(VecError::embedding("dimension must be positive"));
        }
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
