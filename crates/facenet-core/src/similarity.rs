//! Cosine similarity between face embeddings and match classification.

use crate::types::{Embedding, EmbeddingResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default similarity above which two faces are considered the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("cannot compare embeddings of different sizes ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },
}

/// Cosine similarity of two vectors, in [-1, 1].
///
/// A zero-norm input yields NaN; embeddings are expected to come from a
/// model that never emits all-zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Outcome of comparing two face embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    /// `score > threshold`, strictly.
    pub is_match: bool,
    pub message: String,
}

impl SimilarityResult {
    /// Classify a precomputed score against `threshold`.
    pub fn from_score(score: f32, threshold: f32) -> Self {
        Self {
            score,
            is_match: score > threshold,
            message: format!("Face Similarity: {score:.3}"),
        }
    }

    /// Compare two embeddings.
    pub fn between(a: &Embedding, b: &Embedding, threshold: f32) -> Result<Self, SimilarityError> {
        let score = cosine_similarity(&a.values, &b.values)?;
        Ok(Self::from_score(score, threshold))
    }

    /// Compare the first embedding of each result; `None` when either result is empty.
    pub fn from_results(
        a: &EmbeddingResult,
        b: &EmbeddingResult,
        threshold: f32,
    ) -> Option<Result<Self, SimilarityError>> {
        match (a.first(), b.first()) {
            (Some(a), Some(b)) => Some(Self::between(a, b, threshold)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_self_is_one() {
        let a: Vec<f32> = (0..128).map(|i| ((i * 37) % 11) as f32 - 5.0).collect();
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let s = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = [0.3, -1.2, 4.0, 0.5];
        let b = [2.0, 0.1, -0.7, 1.5];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), cosine_similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_nan() {
        let s = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!(s.is_nan());
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 3 });
    }

    #[test]
    fn test_match_is_strictly_greater() {
        assert!(!SimilarityResult::from_score(0.5, 0.5).is_match);
        assert!(SimilarityResult::from_score(0.5001, 0.5).is_match);
        assert!(!SimilarityResult::from_score(-0.2, -0.2).is_match);
        assert!(SimilarityResult::from_score(0.0, -0.1).is_match);
    }

    #[test]
    fn test_nan_score_never_matches() {
        assert!(!SimilarityResult::from_score(f32::NAN, DEFAULT_MATCH_THRESHOLD).is_match);
    }

    #[test]
    fn test_message_three_decimals() {
        let r = SimilarityResult::from_score(0.87654, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(r.message, "Face Similarity: 0.877");
        assert!(r.is_match);
    }

    #[test]
    fn test_between_embeddings() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        let r = SimilarityResult::between(&a, &b, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert!(!r.is_match);
        assert_eq!(r.message, "Face Similarity: 0.000");
    }

    #[test]
    fn test_from_results_missing_embedding() {
        let empty = EmbeddingResult { embeddings: vec![], timestamp: None };
        let full = EmbeddingResult {
            embeddings: vec![Embedding::new(vec![1.0])],
            timestamp: None,
        };
        assert!(SimilarityResult::from_results(&empty, &full, 0.5).is_none());
        let r = SimilarityResult::from_results(&full, &full, 0.5).unwrap().unwrap();
        assert!(r.is_match);
    }
}
