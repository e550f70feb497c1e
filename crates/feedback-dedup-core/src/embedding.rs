//! Embedding provider trait and vector utilities.
//!
//! The [`EmbeddingProvider`] trait is the only view the pipeline has of the
//! embedding model: text goes in, a fixed-length vector comes out. Concrete
//! providers (OpenAI, Ollama) live in the `feedback-dedup` app crate.
//!
//! Vectors are stored as little-endian `f32` BLOBs and compared with
//! [`cosine_similarity`].

use anyhow::Result;
use async_trait::async_trait;

/// Black-box text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier stored next to every vector
    /// (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text. `Ok(None)` means the provider produced no vector
    /// for this input (empty text, filtered content).
    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use feedback_dedup_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, zero
/// vectors, and vectors of different lengths (which come from different
/// models and are never comparable).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
