//! Anchor set registry.
//!
//! An `AnchorSet` pairs k embedding-space anchor vectors with k fixed
//! reduced-space positions. Both halves are frozen at publish time so that
//! projection is a pure function of `(vector, anchor_set)` — no implicitly
//! read global state.

use crate::{AnchorError, Result};
use parking_lot::RwLock;
use sema_vector::{cosine_distance, euclidean_distance, manhattan_distance, Metric};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Half-extent of the default bounding region.
pub const DEFAULT_REGION: f64 = 1024.0;

/// Anchor positions sit on a sphere of this fraction of the region so that
/// solved coordinates have headroom before clamping.
const LAYOUT_RADIUS_FRACTION: f64 = 0.8;

/// Pairwise anchor separations, upper triangle row-major, one table per
/// metric. Measured distances must be compared against separations under the
/// same metric or the triangle-inequality check is meaningless.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeparationTable {
    euclidean: Vec<f32>,
    cosine: Vec<f32>,
    manhattan: Vec<f32>,
}

impl SeparationTable {
    fn build(anchors: &[Vec<f32>]) -> Self {
        let k = anchors.len();
        let mut euclidean = Vec::with_capacity(k * (k - 1) / 2);
        let mut cosine = Vec::with_capacity(k * (k - 1) / 2);
        let mut manhattan = Vec::with_capacity(k * (k - 1) / 2);
        for i in 0..k {
            for j in (i + 1)..k {
                euclidean.push(euclidean_distance(&anchors[i], &anchors[j]));
                cosine.push(cosine_distance(&anchors[i], &anchors[j]));
                manhattan.push(manhattan_distance(&anchors[i], &anchors[j]));
            }
        }
        Self {
            euclidean,
            cosine,
            manhattan,
        }
    }

    fn for_metric(&self, metric: Metric) -> &[f32] {
        match metric {
            Metric::Euclidean => &self.euclidean,
            Metric::Cosine => &self.cosine,
            Metric::Manhattan => &self.manhattan,
        }
    }
}

/// An immutable, versioned anchor set.
///
/// Published through [`AnchorRegistry::register`]; never mutated in place.
/// A new set is a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorSet {
    /// Version number, 1-based and monotonically increasing.
    version: u32,

    /// Embedding-space dimension of every anchor.
    dimension: usize,

    /// Anchor vectors in embedding space.
    anchors: Vec<Vec<f32>>,

    /// Fixed reduced-space position of each anchor.
    positions: Vec<[f64; 3]>,

    /// Pairwise embedding-space separations per metric.
    separations: SeparationTable,

    /// Half-extent of the bounding region projections are clamped to.
    region: f64,

    /// False if the anchors themselves are ill-conditioned (coincident or
    /// collinear in embedding space); every projection under such a set is
    /// low-confidence.
    geometry_ok: bool,
}

impl AnchorSet {
    /// Build a set from raw anchors. Positions are laid out deterministically
    /// on a Fibonacci sphere inside the region, so identical inputs always
    /// produce an identical set.
    fn build(version: u32, anchors: Vec<Vec<f32>>, region: f64) -> Result<Self> {
        if anchors.len() < 3 {
            return Err(AnchorError::TooFewAnchors(anchors.len()));
        }

        let dimension = anchors[0].len();
        for (index, anchor) in anchors.iter().enumerate() {
            if anchor.len() != dimension {
                return Err(AnchorError::AnchorDimensionMismatch {
                    index,
                    expected: dimension,
                    actual: anchor.len(),
                });
            }
            for &v in anchor.iter() {
                if !v.is_finite() {
                    return Err(AnchorError::InvalidAnchor(format!(
                        "non-finite component in anchor {}",
                        index
                    )));
                }
            }
        }

        let k = anchors.len();
        let positions = fibonacci_sphere(k, region * LAYOUT_RADIUS_FRACTION);
        let separations = SeparationTable::build(&anchors);

        let geometry_ok = anchor_geometry_ok(k, &separations.euclidean);
        if !geometry_ok {
            tracing::warn!(
                version,
                k,
                "anchor geometry is ill-conditioned; projections will be low-confidence"
            );
        }

        Ok(Self {
            version,
            dimension,
            anchors,
            positions,
            separations,
            region,
            geometry_ok,
        })
    }

    /// Version number of this set.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Embedding-space dimension the set expects.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of anchors (k).
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// True if the set has no anchors (never the case for a published set).
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Anchor vectors in embedding space.
    pub fn anchors(&self) -> &[Vec<f32>] {
        &self.anchors
    }

    /// Reduced-space position of anchor `i`.
    pub fn position(&self, i: usize) -> [f64; 3] {
        self.positions[i]
    }

    /// Bounding-region half-extent.
    pub fn region(&self) -> f64 {
        self.region
    }

    /// Whether the anchors are well-conditioned in embedding space.
    pub fn geometry_ok(&self) -> bool {
        self.geometry_ok
    }

    /// Embedding-space separation between anchors i and j (i < j) under a
    /// metric.
    pub fn separation(&self, i: usize, j: usize, metric: Metric) -> f32 {
        debug_assert!(i < j);
        self.separations.for_metric(metric)[self.pair_index(i, j)]
    }

    /// Mean pairwise anchor separation under a metric.
    pub fn mean_separation(&self, metric: Metric) -> f64 {
        let seps = self.separations.for_metric(metric);
        if seps.is_empty() {
            return 0.0;
        }
        seps.iter().map(|&s| s as f64).sum::<f64>() / seps.len() as f64
    }

    /// Mean pairwise distance between reduced-space anchor positions.
    pub fn mean_position_separation(&self) -> f64 {
        let k = self.positions.len();
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..k {
            for j in (i + 1)..k {
                let (p, q) = (self.positions[i], self.positions[j]);
                sum += ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2))
                    .sqrt();
                count += 1;
            }
        }
        sum / count as f64
    }

    /// Measure the metric distance from `vector` to every anchor.
    pub fn measure(&self, vector: &[f32], metric: Metric) -> Result<Vec<f64>> {
        if vector.len() != self.dimension {
            return Err(AnchorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(self
            .anchors
            .iter()
            .map(|anchor| metric.distance(vector, anchor) as f64)
            .collect())
    }

    /// Index of pair (i, j), i < j, in the row-major upper triangle.
    fn pair_index(&self, i: usize, j: usize) -> usize {
        let k = self.anchors.len();
        i * k - i * (i + 1) / 2 + (j - i - 1)
    }
}

/// Registry of published anchor sets.
///
/// Holds every version ever published; old versions stay resolvable because
/// stale projections remain valid for content retrieval until reprojection
/// catches up.
#[derive(Default)]
pub struct AnchorRegistry {
    sets: RwLock<Vec<Arc<AnchorSet>>>,
}

impl AnchorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new anchor set with the default bounding region.
    ///
    /// Returns the new version number. The previous version (if any) stays
    /// resolvable; it is simply no longer current.
    pub fn register(&self, anchors: Vec<Vec<f32>>) -> Result<u32> {
        self.register_with_region(anchors, DEFAULT_REGION)
    }

    /// Publish a new anchor set with an explicit bounding-region half-extent.
    pub fn register_with_region(&self, anchors: Vec<Vec<f32>>, region: f64) -> Result<u32> {
        let mut sets = self.sets.write();
        let version = sets.len() as u32 + 1;
        let set = AnchorSet::build(version, anchors, region)?;
        tracing::info!(
            version,
            k = set.len(),
            dimension = set.dimension(),
            "published anchor set"
        );
        sets.push(Arc::new(set));
        Ok(version)
    }

    /// The currently active (most recently published) set.
    pub fn current(&self) -> Result<Arc<AnchorSet>> {
        let sets = self.sets.read();
        sets.last().cloned().ok_or(AnchorError::NoActiveSet)
    }

    /// The current version number, or 0 if nothing is published.
    pub fn current_version(&self) -> u32 {
        let sets = self.sets.read();
        sets.len() as u32
    }

    /// Resolve a specific version.
    pub fn get(&self, version: u32) -> Result<Arc<AnchorSet>> {
        let sets = self.sets.read();
        if version == 0 || version as usize > sets.len() {
            return Err(AnchorError::UnknownVersion(version));
        }
        Ok(sets[version as usize - 1].clone())
    }
}

/// Deterministic Fibonacci-sphere layout of k points at the given radius.
///
/// Gives well-spread, non-collinear positions for any k ≥ 3 without any
/// randomness, so a set's positions depend only on (k, region).
fn fibonacci_sphere(k: usize, radius: f64) -> Vec<[f64; 3]> {
    let golden = std::f64::consts::PI * (1.0 + 5.0f64.sqrt());
    (0..k)
        .map(|i| {
            let t = (i as f64 + 0.5) / k as f64;
            let polar = (1.0 - 2.0 * t).acos();
            let azimuth = golden * i as f64;
            [
                radius * polar.sin() * azimuth.cos(),
                radius * polar.sin() * azimuth.sin(),
                radius * polar.cos(),
            ]
        })
        .collect()
}

/// Check that anchors are neither coincident nor collinear in embedding space.
///
/// Coincident: some pairwise separation is ~0. Collinear (k == 3 case): the
/// triangle spanned by the three pairwise separations has ~zero area (Heron).
/// For k > 3 only the coincidence check applies; least squares tolerates the
/// rest and the residual check catches what it can't.
fn anchor_geometry_ok(k: usize, euclidean_separations: &[f32]) -> bool {
    const COINCIDENT_TOL: f32 = 1e-6;

    if euclidean_separations.iter().any(|&s| s < COINCIDENT_TOL) {
        return false;
    }

    if k == 3 {
        let (a, b, c) = (
            euclidean_separations[0] as f64,
            euclidean_separations[1] as f64,
            euclidean_separations[2] as f64,
        );
        let s = (a + b + c) / 2.0;
        let area_sq = s * (s - a) * (s - b) * (s - c);
        let scale = s * s;
        if area_sq <= 0.0 || area_sq.sqrt() < 1e-4 * scale {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_register_and_versioning() {
        let registry = AnchorRegistry::new();
        assert_eq!(registry.current_version(), 0);
        assert!(registry.current().is_err());

        let v1 = registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2)])
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(registry.current_version(), 1);

        let v2 = registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2), unit(4, 3)])
            .unwrap();
        assert_eq!(v2, 2);

        // Old versions stay resolvable
        assert_eq!(registry.get(1).unwrap().len(), 3);
        assert_eq!(registry.current().unwrap().version(), 2);
        assert!(registry.get(3).is_err());
        assert!(registry.get(0).is_err());
    }

    #[test]
    fn test_too_few_anchors_rejected() {
        let registry = AnchorRegistry::new();
        let err = registry.register(vec![unit(4, 0), unit(4, 1)]);
        assert!(matches!(err, Err(AnchorError::TooFewAnchors(2))));
    }

    #[test]
    fn test_mismatched_anchor_dims_rejected() {
        let registry = AnchorRegistry::new();
        let err = registry.register(vec![unit(4, 0), unit(4, 1), unit(3, 2)]);
        assert!(matches!(
            err,
            Err(AnchorError::AnchorDimensionMismatch { index: 2, .. })
        ));
    }

    #[test]
    fn test_positions_deterministic() {
        let registry_a = AnchorRegistry::new();
        let registry_b = AnchorRegistry::new();
        let anchors = vec![unit(8, 0), unit(8, 1), unit(8, 2), unit(8, 3), unit(8, 4)];

        registry_a.register(anchors.clone()).unwrap();
        registry_b.register(anchors).unwrap();

        let a = registry_a.current().unwrap();
        let b = registry_b.current().unwrap();
        for i in 0..a.len() {
            assert_eq!(a.position(i), b.position(i));
        }
    }

    #[test]
    fn test_positions_spread_and_bounded() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2), unit(4, 3)])
            .unwrap();
        let set = registry.current().unwrap();

        for i in 0..set.len() {
            let p = set.position(i);
            for axis in p {
                assert!(axis.abs() <= set.region());
            }
            for j in (i + 1)..set.len() {
                let q = set.position(j);
                let d = ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2))
                    .sqrt();
                assert!(d > 1.0, "positions {} and {} nearly coincide", i, j);
            }
        }
    }

    #[test]
    fn test_coincident_anchors_flagged() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 0), unit(4, 1)])
            .unwrap();
        assert!(!registry.current().unwrap().geometry_ok());
    }

    #[test]
    fn test_collinear_anchors_flagged() {
        // Three collinear points in embedding space: 0, e0, 2*e0
        let a = vec![0.0, 0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0, 0.0];
        let c = vec![2.0, 0.0, 0.0, 0.0];

        let registry = AnchorRegistry::new();
        registry.register(vec![a, b, c]).unwrap();
        assert!(!registry.current().unwrap().geometry_ok());
    }

    #[test]
    fn test_separation_lookup() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2), unit(4, 3)])
            .unwrap();
        let set = registry.current().unwrap();

        // All unit-axis pairs are sqrt(2) apart in L2, 2 apart in L1
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert!(
                    (set.separation(i, j, Metric::Euclidean) - std::f32::consts::SQRT_2).abs()
                        < 1e-5
                );
                assert!((set.separation(i, j, Metric::Manhattan) - 2.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_measure() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(3, 0), unit(3, 1), unit(3, 2)])
            .unwrap();
        let set = registry.current().unwrap();

        let distances = set.measure(&[1.0, 0.0, 0.0], Metric::Euclidean).unwrap();
        assert!(distances[0] < 1e-6);
        assert!((distances[1] - std::f64::consts::SQRT_2).abs() < 1e-5);

        let err = set.measure(&[1.0, 0.0], Metric::Euclidean);
        assert!(matches!(err, Err(AnchorError::DimensionMismatch { .. })));
    }
}
