//! Voronoi partition table.
//!
//! A small set of centroids computed by k-means over projected coordinates.
//! Queries are assigned to their nearest centroid's cell; the candidate set
//! for a partition-eliminated search is restricted to that cell, optionally
//! widened to boundary-adjacent cells when the query sits near a bisector.
//!
//! Partition elimination trades recall for a large constant-factor speedup
//! and is selected explicitly by the caller, never substituted silently.

use crate::{Result, SpatialError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Bounded k-means iterations; convergence usually arrives much earlier.
const KMEANS_MAX_ITERS: usize = 64;

/// Assignment of a point to a Voronoi cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoronoiCell {
    /// Index of the owning centroid.
    pub cell_id: usize,
    /// Distance to the nearest cell boundary (half the margin between the
    /// best and second-best centroid). Infinite for a single-cell table.
    pub boundary_distance: f64,
}

/// Precomputed centroid set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionTable {
    centroids: Vec<[f64; 3]>,
}

impl PartitionTable {
    /// Build a table by running k-means over the given coordinates.
    ///
    /// Deterministic for identical `(points, k, seed)`: initialization picks
    /// evenly spaced seeded samples and iteration order is fixed. `k` is
    /// clamped to the number of distinct input points.
    pub fn build(points: &[[f64; 3]], k: usize, seed: u64) -> Result<Self> {
        if k == 0 {
            return Err(SpatialError::EmptyPartition);
        }
        if points.is_empty() {
            return Err(SpatialError::EmptyPartition);
        }

        let k = k.min(points.len());
        let mut rng = SmallRng::seed_from_u64(seed);

        // Init: one random sample per stride so seeds spread over the input
        let stride = points.len() / k;
        let mut centroids: Vec<[f64; 3]> = (0..k)
            .map(|i| {
                let lo = i * stride;
                let hi = if i == k - 1 { points.len() } else { lo + stride };
                points[rng.gen_range(lo..hi)]
            })
            .collect();

        let mut assignment = vec![0usize; points.len()];
        for _ in 0..KMEANS_MAX_ITERS {
            let mut changed = false;

            for (i, p) in points.iter().enumerate() {
                let nearest = nearest_centroid(&centroids, *p).0;
                if assignment[i] != nearest {
                    assignment[i] = nearest;
                    changed = true;
                }
            }

            if !changed {
                break;
            }

            let mut sums = vec![[0.0f64; 3]; k];
            let mut counts = vec![0usize; k];
            for (i, p) in points.iter().enumerate() {
                let c = assignment[i];
                sums[c][0] += p[0];
                sums[c][1] += p[1];
                sums[c][2] += p[2];
                counts[c] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    centroids[c] = [
                        sums[c][0] / counts[c] as f64,
                        sums[c][1] / counts[c] as f64,
                        sums[c][2] / counts[c] as f64,
                    ];
                }
                // Empty cells keep their previous centroid
            }
        }

        tracing::debug!(k, points = points.len(), "built partition table");
        Ok(Self { centroids })
    }

    /// Build from explicit centroids (e.g. loaded from a snapshot).
    pub fn from_centroids(centroids: Vec<[f64; 3]>) -> Result<Self> {
        if centroids.is_empty() {
            return Err(SpatialError::EmptyPartition);
        }
        Ok(Self { centroids })
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// True if the table has no centroids (never the case once built).
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// The centroid coordinates.
    pub fn centroids(&self) -> &[[f64; 3]] {
        &self.centroids
    }

    /// Assign a coordinate to its cell.
    pub fn membership(&self, coord: [f64; 3]) -> VoronoiCell {
        let (best, best_d) = nearest_centroid(&self.centroids, coord);

        let mut second = f64::INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            if i == best {
                continue;
            }
            let d = distance(*c, coord);
            if d < second {
                second = d;
            }
        }

        let boundary_distance = if second.is_finite() {
            (second - best_d) / 2.0
        } else {
            f64::INFINITY
        };

        VoronoiCell {
            cell_id: best,
            boundary_distance,
        }
    }

    /// The query's cell plus every cell whose bisector lies within `margin`.
    ///
    /// A query near a boundary belongs almost equally to both sides; widening
    /// the candidate set by `margin` recovers neighbors that fell across it.
    pub fn cells_within(&self, coord: [f64; 3], margin: f64) -> Vec<usize> {
        let (best, best_d) = nearest_centroid(&self.centroids, coord);

        let mut cells = vec![best];
        for (i, c) in self.centroids.iter().enumerate() {
            if i == best {
                continue;
            }
            let bisector_distance = (distance(*c, coord) - best_d) / 2.0;
            if bisector_distance <= margin {
                cells.push(i);
            }
        }
        cells
    }
}

fn nearest_centroid(centroids: &[[f64; 3]], p: [f64; 3]) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = distance(*c, p);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    (best, best_d)
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight blobs far apart plus the points between them.
    fn two_blobs() -> Vec<[f64; 3]> {
        let mut points = Vec::new();
        for i in 0..20 {
            let t = (i % 5) as f64 * 0.1;
            points.push([-50.0 + t, t, -t]);
            points.push([50.0 - t, -t, t]);
        }
        points
    }

    #[test]
    fn test_build_rejects_degenerate_input() {
        assert!(PartitionTable::build(&[], 4, 1).is_err());
        assert!(PartitionTable::build(&[[0.0, 0.0, 0.0]], 0, 1).is_err());
    }

    #[test]
    fn test_two_blobs_separate() {
        let points = two_blobs();
        let table = PartitionTable::build(&points, 2, 42).unwrap();

        let left = table.membership([-50.0, 0.0, 0.0]);
        let right = table.membership([50.0, 0.0, 0.0]);
        assert_ne!(left.cell_id, right.cell_id);

        // Deep inside a blob the boundary is far away
        assert!(left.boundary_distance > 10.0);
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let points = two_blobs();
        let a = PartitionTable::build(&points, 2, 7).unwrap();
        let b = PartitionTable::build(&points, 2, 7).unwrap();
        assert_eq!(a.centroids(), b.centroids());
    }

    #[test]
    fn test_k_clamped_to_point_count() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let table = PartitionTable::build(&points, 16, 1).unwrap();
        assert!(table.len() <= 2);
    }

    #[test]
    fn test_single_cell_boundary_infinite() {
        let table = PartitionTable::from_centroids(vec![[0.0, 0.0, 0.0]]).unwrap();
        let cell = table.membership([10.0, 0.0, 0.0]);
        assert_eq!(cell.cell_id, 0);
        assert!(cell.boundary_distance.is_infinite());
    }

    #[test]
    fn test_cells_within_margin() {
        let table = PartitionTable::from_centroids(vec![
            [-10.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [1000.0, 0.0, 0.0],
        ])
        .unwrap();

        // Dead center between the first two cells: margin 1 catches both
        let cells = table.cells_within([0.0, 0.0, 0.0], 1.0);
        assert!(cells.contains(&0) && cells.contains(&1));
        assert!(!cells.contains(&2));

        // Deep inside cell 0: only cell 0
        let cells = table.cells_within([-10.0, 0.0, 0.0], 1.0);
        assert_eq!(cells, vec![0]);
    }

    #[test]
    fn test_membership_boundary_distance_midpoint() {
        let table = PartitionTable::from_centroids(vec![
            [-10.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
        ])
        .unwrap();

        // 4 units from the left centroid toward the right: distances are 4
        // and 16, bisector sits at distance (16 - 4) / 2 = 6
        let cell = table.membership([-6.0, 0.0, 0.0]);
        assert_eq!(cell.cell_id, 0);
        assert!((cell.boundary_distance - 6.0).abs() < 1e-9);
    }
}
