//! sqlvec-embed - Embedding providers that need no model runtime
//!
//! - [`HashingEmbedder`]: feature-hashed bag of words, so texts sharing
//!   words get similar vectors
//! - [`MockEmbedder`]: deterministic pseudo-random vectors for tests

mod hashing;
mod mock;

pub use hashing::HashingEmbedder;
pub use mock::MockEmbedder;

// Re-export the Embedder trait for convenience
pub use sqlvec_core::Embedder;

/// First 8 bytes of the BLAKE3 hash, stable across platforms and releases.
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// L2 normalize a vector. Zero vectors are returned unchanged.
pub(crate) fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
