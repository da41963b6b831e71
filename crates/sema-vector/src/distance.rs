//! Distance metrics for vector similarity.
//!
//! Three metrics are supported:
//! - **Euclidean (L2)**: straight-line distance, the default for projected coordinates
//! - **Cosine**: angle-based, the usual choice for normalized embeddings
//! - **Manhattan (L1)**: sum of absolute differences, robust to outlier dimensions
//!
//! All functions run on `f32` slices and are written to be auto-vectorized in
//! release builds.

use serde::{Deserialize, Serialize};

/// Distance metric enumeration.
///
/// Lower values always mean "more similar"; every metric here satisfies the
/// triangle inequality except Cosine on unnormalized inputs, which callers
/// should treat as best-effort for path optimality purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean (L2) distance: sqrt(sum((a[i] - b[i])^2))
    Euclidean,
    /// Cosine distance: 1 - (a · b) / (||a|| * ||b||), in [0, 2]
    Cosine,
    /// Manhattan (L1) distance: sum(|a[i] - b[i]|)
    Manhattan,
}

impl Metric {
    /// Compute the distance between two vectors under this metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Euclidean => euclidean_distance(a, b),
            Self::Cosine => cosine_distance(a, b),
            Self::Manhattan => manhattan_distance(a, b),
        }
    }
}

/// Compute Euclidean (L2) distance between two vectors.
///
/// # Example
///
/// ```
/// use sema_vector::euclidean_distance;
///
/// let a = [0.0, 0.0, 0.0];
/// let b = [3.0, 4.0, 0.0];
/// assert!((euclidean_distance(&a, &b) - 5.0).abs() < 0.001);
/// ```
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Compute squared Euclidean distance (avoids the sqrt for comparisons).
///
/// Ranking by squared distance is equivalent to ranking by distance, so the
/// coarse filter uses this form.
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    // Process in chunks of 4 for better auto-vectorization
    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}

/// Compute cosine distance between two vectors.
///
/// Returns a value in [0, 2]: 0 = identical direction, 1 = orthogonal,
/// 2 = opposite. Zero vectors are treated as orthogonal to everything.
///
/// # Example
///
/// ```
/// use sema_vector::cosine_distance;
///
/// let a = [1.0, 0.0];
/// let b = [0.0, 1.0];
/// assert!((cosine_distance(&a, &b) - 1.0).abs() < 0.001);
/// ```
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let (dot, norm_a, norm_b) = dot_and_norms(a, b);

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return 1.0; // Undefined for zero vectors, return orthogonal
    }

    // Clamp to [-1, 1] to absorb floating point error
    let similarity = (dot / denom).clamp(-1.0, 1.0);

    1.0 - similarity
}

/// Compute Manhattan (L1) distance between two vectors.
///
/// # Example
///
/// ```
/// use sema_vector::manhattan_distance;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 0.0, 3.0];
/// assert!((manhattan_distance(&a, &b) - 5.0).abs() < 0.001);
/// ```
#[inline]
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += (a[base] - b[base]).abs()
            + (a[base + 1] - b[base + 1]).abs()
            + (a[base + 2] - b[base + 2]).abs()
            + (a[base + 3] - b[base + 3]).abs();
    }

    for i in (chunks * 4)..a.len() {
        sum += (a[i] - b[i]).abs();
    }

    sum
}

/// Compute dot product and squared norms in a single pass.
///
/// Returns (dot, norm_a_squared, norm_b_squared).
#[inline]
fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;

        dot += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];

        norm_a += a[base] * a[base]
            + a[base + 1] * a[base + 1]
            + a[base + 2] * a[base + 2]
            + a[base + 3] * a[base + 3];

        norm_b += b[base] * b[base]
            + b[base + 1] * b[base + 1]
            + b[base + 2] * b[base + 2]
            + b[base + 3] * b[base + 3];
    }

    for i in (chunks * 4)..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    (dot, norm_a, norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 0.001);

        let c = [1.0, 2.0, 3.0];
        assert!(euclidean_distance(&c, &c) < 0.001);
    }

    #[test]
    fn test_euclidean_distance_squared() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((euclidean_distance_squared(&a, &b) - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_distance() {
        // Identical direction = 0
        let a = [1.0, 2.0, 3.0];
        assert!(cosine_distance(&a, &a) < 0.001);

        // Orthogonal = 1
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert!((cosine_distance(&b, &c) - 1.0).abs() < 0.001);

        // Opposite = 2
        let d = [1.0, 0.0];
        let e = [-1.0, 0.0];
        assert!((cosine_distance(&d, &e) - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!(cosine_distance(&a, &b) < 0.001);
    }

    #[test]
    fn test_manhattan_distance() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 0.0, 3.0];
        // |1-4| + |2-0| + |3-3| = 5
        assert!((manhattan_distance(&a, &b) - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_metric_enum() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];

        let d = Metric::Euclidean.distance(&a, &b);
        assert!((d - std::f32::consts::SQRT_2).abs() < 0.001);

        let d = Metric::Cosine.distance(&a, &b);
        assert!((d - 1.0).abs() < 0.001);

        let d = Metric::Manhattan.distance(&a, &b);
        assert!((d - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_high_dimensional() {
        // 128 dimensions, each component off by one
        let a: Vec<f32> = (0..128).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..128).map(|i| (i + 1) as f32).collect();

        let d = euclidean_distance(&a, &b);
        assert!((d - (128.0f32).sqrt()).abs() < 0.01);

        let d = manhattan_distance(&a, &b);
        assert!((d - 128.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_vector_cosine() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 2.0, 3.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 0.001);
    }
}
