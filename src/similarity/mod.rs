//! Vector similarity primitives.
//!
//! Every comparison in the crate (recurrence detection and subject search)
//! goes through [`cosine_similarity`]. It is a pure function with a single
//! failure mode: comparing vectors of different dimensionality.

use thiserror::Error;

/// Errors raised by vector comparisons.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimilarityError {
    /// The two vectors do not have the same number of dimensions
    #[error("Vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Result type for similarity computations.
pub type SimilarityResult<T> = Result<T, SimilarityError>;

/// Compute cosine similarity between two vectors.
///
/// The result lies in `[-1, 1]` and is never NaN. A vector with zero
/// magnitude carries no direction, so any comparison involving one yields
/// `0.0`. The same holds for vectors with non-finite components.
///
/// Sums are accumulated in `f64` so large finite components cannot overflow.
///
/// # Errors
/// Returns `SimilarityError::DimensionMismatch` if the vectors differ in length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> SimilarityResult<f32> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot_product = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let similarity = dot_product / (norm_a.sqrt() * norm_b.sqrt());
    if norm_a == 0.0 || norm_b == 0.0 || !similarity.is_finite() {
        return Ok(0.0);
    }

    // Rounding can push |a|==|b| comparisons a hair past 1.0
    Ok((similarity as f32).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let pairs = [
            (vec![0.3, -1.2, 4.0], vec![2.0, 0.5, -0.7]),
            (vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]),
            (vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]),
        ];
        for (a, b) in pairs.iter() {
            assert_eq!(
                cosine_similarity(a, b).unwrap(),
                cosine_similarity(b, a).unwrap()
            );
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        for v in [vec![0.1, 0.2, 0.3], vec![-5.0, 12.0], vec![1e-3, 7.5, -2.25, 9.0]] {
            assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_vector_yields_zero() {
        let zero = vec![0.0; 4];
        let other = vec![1.0, -2.0, 3.0, 0.5];

        let score = cosine_similarity(&zero, &other).unwrap();
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());

        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 3 });
    }

    #[test]
    fn test_known_angle() {
        // 4 / (1 * 5) is exactly representable as the f32 nearest 0.8
        let score = cosine_similarity(&[1.0, 0.0], &[4.0, 3.0]).unwrap();
        assert_eq!(score, 0.8);
    }

    #[test]
    fn test_large_components_do_not_overflow() {
        let a = [1e20f32, 1e20];
        let similarity = cosine_similarity(&a, &a).unwrap();
        assert!((similarity - 1.0).abs() < 1e-6);

        let b = [1e20f32, -1e20];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_components_yield_zero() {
        assert_eq!(cosine_similarity(&[f32::NAN, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[f32::INFINITY, 1.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[f32::NEG_INFINITY, 0.0]).unwrap(), 0.0);
    }
}
