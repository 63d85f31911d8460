//! Embedding providers and the vector blob codec.
//!
//! No embedding provider is required: [`HashEmbedder`] derives a
//! deterministic 384-dimensional vector from the text alone and is always
//! available as the fallback. Real providers implement [`Embedder`] and
//! are injected by the embedder host.
//!
//! Vectors persist as one contiguous blob of native-endian IEEE-754 `f32`
//! values; a blob whose byte length is not a multiple of 4 is corrupt.

use dashmap::DashMap;
use miette::Diagnostic;
use thiserror::Error;

/// Dimension of the fallback embedding.
pub const FALLBACK_DIMENSIONS: usize = 384;

/// Errors from embedding and blob handling.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {message}")]
    #[diagnostic(
        code(chitragupta::embedding::provider),
        help("The external embedding provider errored. The hash fallback is always available.")
    )]
    Provider { message: String },

    #[error("corrupt vector blob: {len} bytes is not a multiple of 4")]
    #[diagnostic(
        code(chitragupta::embedding::corrupt_blob),
        help(
            "Vector blobs are raw f32 sequences; a length that is not a multiple of 4 \
             means the row was truncated or written by something else. Re-index the source."
        )
    )]
    CorruptBlob { len: usize },
}

pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// Anything that can turn text into a vector.
pub trait Embedder: Send + Sync {
    /// Identifier for diagnostics.
    fn name(&self) -> &str;

    /// Embed one text.
    fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Output dimensionality.
    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Blob codec
// ---------------------------------------------------------------------------

/// Serialize a vector as a contiguous native-endian f32 blob.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_ne_bytes());
    }
    blob
}

/// Reconstruct a vector from a blob, rejecting misaligned lengths.
pub fn blob_to_vector(blob: &[u8]) -> EmbeddingResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(EmbeddingError::CorruptBlob { len: blob.len() });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// Hash fallback
// ---------------------------------------------------------------------------

/// Deterministic hash-based embedder, always available.
///
/// Component `i` is the sine of a 64-bit mix of the text hash, rotated by
/// the byte at position `i mod len`; the result is ℓ2-normalized. Equal
/// texts always produce equal vectors, on any platform.
#[derive(Debug, Default)]
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash-fallback"
    }

    fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let seed = crate::hash::fnv1a_u64(text);
        let bytes = text.as_bytes();
        let mut vector = Vec::with_capacity(FALLBACK_DIMENSIONS);
        for i in 0..FALLBACK_DIMENSIONS {
            let mut mixed = seed ^ (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            let rotation = if bytes.is_empty() {
                (i % 63) as u32
            } else {
                u32::from(bytes[i % bytes.len()]) % 63
            };
            mixed = mixed.rotate_left(rotation);
            let angle = (mixed as f64 / u64::MAX as f64) * std::f64::consts::TAU;
            vector.push(angle.sin() as f32);
        }

        let norm = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value = (f64::from(*value) / norm) as f32;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        FALLBACK_DIMENSIONS
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// Concurrent-read, per-key-write embedding cache around any embedder.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: DashMap<String, Vec<f32>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit.clone());
        }
        let vector = self.inner.embed(text)?;
        self.cache.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
