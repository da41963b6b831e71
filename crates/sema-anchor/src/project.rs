//! Trilateration projection.
//!
//! Solves for the 3D point whose distances to the anchor positions best
//! match the measured embedding-space distances. Exactly three anchors use
//! the closed-form two-circle construction in a local frame; more anchors
//! use bounded Gauss-Newton least squares. All intermediates are f64
//! regardless of stored vector precision.

use crate::set::AnchorSet;
use crate::Result;
use sema_vector::Metric;
use serde::{Deserialize, Serialize};

/// Triangle-inequality slack as a fraction of the separation being tested.
const TRIANGLE_TOL: f64 = 0.05;

/// Closed-form solve: how far below zero z² may fall (relative to the
/// position scale squared) before the distances are declared inconsistent.
/// Generous for the same reason as `RESIDUAL_TOL`: the projection is lossy
/// by design and moderate overshoot is expected, not degenerate.
const PLANE_TOL: f64 = 2.0;

/// Gauss-Newton: max iterations and convergence threshold.
const GN_MAX_ITERS: usize = 32;
const GN_CONVERGED: f64 = 1e-9;

/// Gauss-Newton: residual RMS above this multiple of the position scale
/// flags the projection. A high-dimensional point rarely embeds exactly in
/// 3D, so ordinary lossiness must pass; the triangle-inequality check is
/// the primary degeneracy signal and this only catches unrealizable junk.
const RESIDUAL_TOL: f64 = 2.0;

/// Projection quality flag.
///
/// Low-confidence projections participate only in brute-force fallback
/// queries, never the indexed coarse filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    Normal,
    Low,
}

/// A projected coordinate, tagged with the anchor-set version it was
/// computed under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Clamped coordinate inside `[-region, region]³`.
    pub coord: [f64; 3],
    /// Version of the anchor set used.
    pub anchor_set_version: u32,
    /// Quality flag.
    pub confidence: Confidence,
}

impl Projection {
    /// True if this projection may enter the indexed coarse filter.
    pub fn indexable(&self) -> bool {
        self.confidence == Confidence::Normal
    }
}

/// Project an embedding to a bounded 3D coordinate under the given set.
///
/// Never fails on degenerate geometry — ill-conditioned inputs produce a
/// `Confidence::Low` projection instead. The only error is a dimension
/// mismatch between the vector and the set.
///
/// Identical `(vector, set, metric)` inputs always produce identical output:
/// the solve is pure floating-point arithmetic with no randomness.
pub fn project(vector: &[f32], set: &AnchorSet, metric: Metric) -> Result<Projection> {
    let measured = set.measure(vector, metric)?;

    let mut confidence = if set.geometry_ok() {
        Confidence::Normal
    } else {
        Confidence::Low
    };

    if violates_triangle_inequality(&measured, set, metric) {
        confidence = Confidence::Low;
    }

    // Measured distances live in embedding units; anchor positions live in
    // region units. Rescale so the solver works at a consistent scale.
    let mean_sep = set.mean_separation(metric);
    let scale = if mean_sep > 1e-12 {
        set.mean_position_separation() / mean_sep
    } else {
        1.0
    };
    let scaled: Vec<f64> = measured.iter().map(|r| r * scale).collect();

    let positions: Vec<[f64; 3]> = (0..set.len()).map(|i| set.position(i)).collect();

    let (coord, solve_ok) = if positions.len() == 3 {
        let frame = [positions[0], positions[1], positions[2]];
        solve_three(&scaled, &frame, set.mean_position_separation())
    } else {
        solve_least_squares(&scaled, &positions, set.mean_position_separation())
    };

    if !solve_ok {
        confidence = Confidence::Low;
    }

    let region = set.region();
    let coord = [
        coord[0].clamp(-region, region),
        coord[1].clamp(-region, region),
        coord[2].clamp(-region, region),
    ];

    Ok(Projection {
        coord,
        anchor_set_version: set.version(),
        confidence,
    })
}

/// Check measured distances against anchor separations under the same
/// metric: for any two anchors A, B and point P, |PA - PB| ≤ AB and
/// PA + PB ≥ AB must hold up to tolerance. Violations mean the "distances"
/// are not realizable by any point (typically a non-metric similarity or
/// numerical junk).
fn violates_triangle_inequality(measured: &[f64], set: &AnchorSet, metric: Metric) -> bool {
    let k = measured.len();
    for i in 0..k {
        for j in (i + 1)..k {
            let sep = set.separation(i, j, metric) as f64;
            let tol = TRIANGLE_TOL * (sep + 1e-6);
            if (measured[i] - measured[j]).abs() > sep + tol {
                return true;
            }
            if measured[i] + measured[j] < sep - tol {
                return true;
            }
        }
    }
    false
}

/// Closed-form trilateration for exactly three anchors.
///
/// Builds a local orthonormal frame on the anchor plane, solves the two
/// circle equations for (x, y), and takes z from the residual radius.
/// Returns `(coord, ok)`; `ok` is false when the frame is degenerate or
/// z² is negative beyond tolerance (distances inconsistent with the
/// geometry).
pub(crate) fn solve_three(r: &[f64], q: &[[f64; 3]; 3], scale: f64) -> ([f64; 3], bool) {
    let ex_raw = sub(q[1], q[0]);
    let d = norm(ex_raw);
    if d < 1e-9 {
        return (q[0], false);
    }
    let ex = scale_vec(ex_raw, 1.0 / d);

    let q2_rel = sub(q[2], q[0]);
    let i = dot(ex, q2_rel);
    let ey_raw = sub(q2_rel, scale_vec(ex, i));
    let j = norm(ey_raw);
    if j < 1e-9 {
        return (q[0], false);
    }
    let ey = scale_vec(ey_raw, 1.0 / j);
    let ez = cross(ex, ey);

    let x = (r[0] * r[0] - r[1] * r[1] + d * d) / (2.0 * d);
    let y = (r[0] * r[0] - r[2] * r[2] + i * i + j * j - 2.0 * i * x) / (2.0 * j);

    let z_sq = r[0] * r[0] - x * x - y * y;
    let ok = z_sq >= -PLANE_TOL * scale * scale;
    let z = z_sq.max(0.0).sqrt();

    // The mirror point -z satisfies the same distances; +z is chosen so the
    // result is a function of the inputs alone.
    let coord = add(
        add(q[0], scale_vec(ex, x)),
        add(scale_vec(ey, y), scale_vec(ez, z)),
    );
    (coord, ok)
}

/// Gauss-Newton least squares for more than three anchors.
///
/// Minimizes Σ (|p - qᵢ| - rᵢ)², seeded from the inverse-distance-weighted
/// centroid of the anchor positions. Iterations are bounded; a singular
/// normal matrix or an oversized final residual reports `ok = false`.
pub(crate) fn solve_least_squares(r: &[f64], q: &[[f64; 3]], scale: f64) -> ([f64; 3], bool) {
    // Seed: anchors the point is close to pull harder.
    let mut wsum = 0.0;
    let mut p = [0.0f64; 3];
    for (qi, &ri) in q.iter().zip(r.iter()) {
        let w = 1.0 / (ri + 1e-6);
        p = add(p, scale_vec(*qi, w));
        wsum += w;
    }
    p = scale_vec(p, 1.0 / wsum);

    let mut ok = true;
    for _ in 0..GN_MAX_ITERS {
        // Normal equations: (JᵀJ) δ = -Jᵀf with Jᵢ = (p - qᵢ)/|p - qᵢ|
        let mut jtj = [[0.0f64; 3]; 3];
        let mut jtf = [0.0f64; 3];

        for (qi, &ri) in q.iter().zip(r.iter()) {
            let diff = sub(p, *qi);
            let dist = norm(diff).max(1e-9);
            let row = scale_vec(diff, 1.0 / dist);
            let f = dist - ri;

            for a in 0..3 {
                for b in 0..3 {
                    jtj[a][b] += row[a] * row[b];
                }
                jtf[a] += row[a] * f;
            }
        }

        let delta = match solve_3x3(jtj, [-jtf[0], -jtf[1], -jtf[2]]) {
            Some(delta) => delta,
            None => {
                ok = false;
                break;
            }
        };

        p = add(p, delta);
        if norm(delta) < GN_CONVERGED * scale.max(1.0) {
            break;
        }
    }

    // Residual check: distances should be roughly realizable in 3D.
    let mut rss = 0.0;
    for (qi, &ri) in q.iter().zip(r.iter()) {
        let f = norm(sub(p, *qi)) - ri;
        rss += f * f;
    }
    let rms = (rss / r.len() as f64).sqrt();
    if rms > RESIDUAL_TOL * scale.max(1.0) {
        ok = false;
    }

    (p, ok)
}

/// Solve a symmetric 3x3 linear system by Cramer's rule.
fn solve_3x3(m: [[f64; 3]; 3], b: [f64; 3]) -> Option<[f64; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }

    let mut x = [0.0f64; 3];
    for col in 0..3 {
        let mut mc = m;
        for row in 0..3 {
            mc[row][col] = b[row];
        }
        let det_c = mc[0][0] * (mc[1][1] * mc[2][2] - mc[1][2] * mc[2][1])
            - mc[0][1] * (mc[1][0] * mc[2][2] - mc[1][2] * mc[2][0])
            + mc[0][2] * (mc[1][0] * mc[2][1] - mc[1][1] * mc[2][0]);
        x[col] = det_c / det;
    }
    Some(x)
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale_vec(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::AnchorRegistry;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn dist(a: [f64; 3], b: [f64; 3]) -> f64 {
        norm(sub(a, b))
    }

    #[test]
    fn test_solve_three_recovers_consistent_distances() {
        let q = [
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
        ];
        let target = [3.0, 4.0, 2.0];
        let r = [dist(target, q[0]), dist(target, q[1]), dist(target, q[2])];

        let (solved, ok) = solve_three(&r, &q, 10.0);
        assert!(ok);

        // The solution must reproduce the measured distances (the mirror
        // image across the anchor plane is equally valid).
        for (qi, ri) in q.iter().zip(r.iter()) {
            assert!((dist(solved, *qi) - ri).abs() < 1e-6);
        }
    }

    #[test]
    fn test_solve_three_point_on_plane() {
        let q = [
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
        ];
        let target = [2.0, 7.0, 0.0];
        let r = [dist(target, q[0]), dist(target, q[1]), dist(target, q[2])];

        let (solved, ok) = solve_three(&r, &q, 10.0);
        assert!(ok);
        assert!(dist(solved, target) < 1e-6);
    }

    #[test]
    fn test_solve_three_inconsistent_distances_flagged() {
        let q = [
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
        ];
        // Distances no point can remotely satisfy: touching two far-apart
        // anchors while being 30 away from the third
        let r = [0.1, 0.1, 30.0];

        let (_, ok) = solve_three(&r, &q, 10.0);
        assert!(!ok);
    }

    #[test]
    fn test_least_squares_recovers_exact_distances() {
        let q = vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
            [0.0, 0.0, 10.0],
            [10.0, 10.0, 10.0],
        ];
        let target = [4.0, 3.0, 5.0];
        let r: Vec<f64> = q.iter().map(|qi| dist(target, *qi)).collect();

        let (solved, ok) = solve_least_squares(&r, &q, 10.0);
        assert!(ok);
        assert!(dist(solved, target) < 1e-5);
    }

    #[test]
    fn test_least_squares_noisy_distances_still_close() {
        let q = vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
            [0.0, 0.0, 10.0],
        ];
        let target = [4.0, 3.0, 5.0];
        let r: Vec<f64> = q
            .iter()
            .enumerate()
            .map(|(i, qi)| dist(target, *qi) + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();

        let (solved, ok) = solve_least_squares(&r, &q, 10.0);
        assert!(ok);
        assert!(dist(solved, target) < 0.5);
    }

    #[test]
    fn test_project_deterministic() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(8, 0), unit(8, 1), unit(8, 2), unit(8, 3)])
            .unwrap();
        let set = registry.current().unwrap();

        let vector: Vec<f32> = (0..8).map(|i| (i as f32) * 0.25 - 1.0).collect();

        let a = project(&vector, &set, Metric::Euclidean).unwrap();
        let b = project(&vector, &set, Metric::Euclidean).unwrap();

        assert_eq!(a.coord, b.coord);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.anchor_set_version, 1);
    }

    #[test]
    fn test_project_within_region() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2)])
            .unwrap();
        let set = registry.current().unwrap();

        for scale in [0.1f32, 1.0, 100.0] {
            let vector = vec![scale, -scale, scale * 2.0, 0.0];
            let p = project(&vector, &set, Metric::Euclidean).unwrap();
            for axis in p.coord {
                assert!(axis.abs() <= set.region());
            }
        }
    }

    #[test]
    fn test_project_degenerate_set_is_low_confidence() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 0), unit(4, 1)])
            .unwrap();
        let set = registry.current().unwrap();

        let p = project(&unit(4, 2), &set, Metric::Euclidean).unwrap();
        assert_eq!(p.confidence, Confidence::Low);
        assert!(!p.indexable());
    }

    #[test]
    fn test_project_preserves_coarse_neighborhoods() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(8, 0), unit(8, 1), unit(8, 2), unit(8, 3), unit(8, 4)])
            .unwrap();
        let set = registry.current().unwrap();

        // Two near-duplicates and one distant outlier
        let a: Vec<f32> = vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let b: Vec<f32> = vec![1.0, 1.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let far: Vec<f32> = vec![0.0, 0.0, 0.0, 0.0, 0.0, -5.0, 5.0, 5.0];

        let pa = project(&a, &set, Metric::Euclidean).unwrap();
        let pb = project(&b, &set, Metric::Euclidean).unwrap();
        let pf = project(&far, &set, Metric::Euclidean).unwrap();

        let near_d = dist(pa.coord, pb.coord);
        let far_d = dist(pa.coord, pf.coord);
        assert!(
            near_d < far_d,
            "near pair projected {} apart, outlier only {}",
            near_d,
            far_d
        );
    }

    #[test]
    fn test_project_dimension_mismatch() {
        let registry = AnchorRegistry::new();
        registry
            .register(vec![unit(4, 0), unit(4, 1), unit(4, 2)])
            .unwrap();
        let set = registry.current().unwrap();

        assert!(project(&[1.0, 0.0], &set, Metric::Euclidean).is_err());
    }
}
