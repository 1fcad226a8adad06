//! Embeddings for the slow-thought walk
//!
//! All vectors are unit length. Construction rejects non-finite components
//! so that a bad model output can never poison a nearest-neighbour search.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::EmbeddingError;

/// Unit-norm embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Validate and normalize a raw vector
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(EmbeddingError::ZeroNorm);
        }
        Ok(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity (dot product of unit vectors)
    pub fn cosine(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        check_dimension(self.dimension(), other.dimension())?;
        Ok(dot(&self.0, &other.0))
    }

    /// `self - other`, left unnormalized
    pub fn difference(&self, other: &Embedding) -> Result<Vec<f32>, EmbeddingError> {
        check_dimension(self.dimension(), other.dimension())?;
        Ok(self.0.iter().zip(&other.0).map(|(a, b)| a - b).collect())
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), EmbeddingError> {
    if expected != actual {
        return Err(EmbeddingError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Turns text into embeddings
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

/// Deterministic bag-of-words embedder
///
/// Each lowercased word is hashed into a bucket with a hashed sign, so texts
/// that share words land close together. No model, no network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut values = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        Embedding::new(values)
    }
}

/// Index of the candidate most similar to `query` (ties go to the lowest index)
///
/// `query` need not be unit length; cosine order is unaffected by its norm.
pub fn nearest(query: &[f32], candidates: &[Embedding]) -> Result<Option<usize>, EmbeddingError> {
    if let Some(index) = query.iter().position(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite { index });
    }
    let mut best: Option<(usize, f32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        check_dimension(query.len(), candidate.dimension())?;
        let score = dot(query, candidate.as_slice());
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    Ok(best.map(|(i, _)| i))
}

// =============================================================================
// TESTS
// =============================================================================
