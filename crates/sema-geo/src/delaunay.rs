//! 2D Delaunay triangulation.
//!
//! Bowyer-Watson incremental insertion with a super-triangle. Quadratic in
//! the worst case, which is fine for the visualization-sized inputs this
//! serves; it is not on the ingestion-critical path.

/// A triangle as indices into the input point slice.
pub type Triangle = [usize; 3];

/// Delaunay triangulation of a 2D point set.
///
/// Returns triangles as index triples into `points`. Fewer than three
/// points (or a fully degenerate input) yields no triangles. Duplicate
/// points are tolerated; later duplicates simply produce no triangles of
/// their own.
pub fn delaunay_2d(points: &[[f64; 2]]) -> Vec<Triangle> {
    if points.len() < 3 {
        return Vec::new();
    }

    // Super-triangle comfortably containing every input point
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p[0]);
        min_y = min_y.min(p[1]);
        max_x = max_x.max(p[0]);
        max_y = max_y.max(p[1]);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let mid_x = (min_x + max_x) / 2.0;
    let mid_y = (min_y + max_y) / 2.0;

    let super_a = [mid_x - 20.0 * span, mid_y - span];
    let super_b = [mid_x + 20.0 * span, mid_y - span];
    let super_c = [mid_x, mid_y + 20.0 * span];

    // Working vertex array: inputs followed by the three super vertices
    let n = points.len();
    let vertex = |i: usize| -> [f64; 2] {
        match i {
            i if i < n => points[i],
            i if i == n => super_a,
            i if i == n + 1 => super_b,
            _ => super_c,
        }
    };

    let mut triangles: Vec<Triangle> = vec![[n, n + 1, n + 2]];

    for i in 0..n {
        let p = points[i];

        // Triangles whose circumcircle contains p
        let mut bad: Vec<usize> = Vec::new();
        for (t, tri) in triangles.iter().enumerate() {
            if in_circumcircle(p, vertex(tri[0]), vertex(tri[1]), vertex(tri[2])) {
                bad.push(t);
            }
        }

        // Boundary of the cavity: edges belonging to exactly one bad triangle
        let mut boundary: Vec<(usize, usize)> = Vec::new();
        for &t in &bad {
            let tri = triangles[t];
            for edge in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let twin = (edge.1, edge.0);
                if let Some(pos) = boundary.iter().position(|&e| e == twin) {
                    boundary.remove(pos);
                } else {
                    boundary.push(edge);
                }
            }
        }

        // Remove bad triangles (descending index keeps positions valid)
        for &t in bad.iter().rev() {
            triangles.swap_remove(t);
        }

        // Re-triangulate the cavity around p
        for (a, b) in boundary {
            triangles.push([a, b, i]);
        }
    }

    // Drop everything touching the super-triangle, plus any zero-area
    // sliver a degenerate input produced
    triangles.retain(|tri| {
        tri.iter().all(|&v| v < n) && {
            let (a, b, c) = (points[tri[0]], points[tri[1]], points[tri[2]]);
            let doubled_area = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
            doubled_area.abs() > 1e-12
        }
    });
    triangles
}

/// True if `p` lies strictly inside the circumcircle of (a, b, c).
fn in_circumcircle(p: [f64; 2], a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> bool {
    // Standard determinant test; orientation-normalized
    let (ax, ay) = (a[0] - p[0], a[1] - p[1]);
    let (bx, by) = (b[0] - p[0], b[1] - p[1]);
    let (cx, cy) = (c[0] - p[0], c[1] - p[1]);

    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);

    let orientation = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
    if orientation > 0.0 {
        det > 0.0
    } else {
        det < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_triangle() {
        let points = [[0.0, 0.0], [1.0, 0.0], [0.5, 1.0]];
        let triangles = delaunay_2d(&points);
        assert_eq!(triangles.len(), 1);
        let mut tri = triangles[0];
        tri.sort();
        assert_eq!(tri, [0, 1, 2]);
    }

    #[test]
    fn test_square_two_triangles() {
        let points = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let triangles = delaunay_2d(&points);
        assert_eq!(triangles.len(), 2);

        // Together the two triangles use all four corners
        let mut used: Vec<usize> = triangles.iter().flatten().copied().collect();
        used.sort();
        used.dedup();
        assert_eq!(used, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_too_few_points() {
        assert!(delaunay_2d(&[]).is_empty());
        assert!(delaunay_2d(&[[0.0, 0.0]]).is_empty());
        assert!(delaunay_2d(&[[0.0, 0.0], [1.0, 1.0]]).is_empty());
    }

    #[test]
    fn test_collinear_points_yield_nothing() {
        let points = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        let triangles = delaunay_2d(&points);
        assert!(triangles.is_empty());
    }

    #[test]
    fn test_delaunay_property() {
        // No input point may lie strictly inside any triangle's circumcircle
        let points = [
            [0.0, 0.0],
            [3.0, 0.5],
            [1.5, 2.5],
            [4.0, 3.0],
            [0.5, 4.0],
            [2.0, 1.0],
        ];
        let triangles = delaunay_2d(&points);
        assert!(!triangles.is_empty());

        for tri in &triangles {
            let (a, b, c) = (points[tri[0]], points[tri[1]], points[tri[2]]);
            for (i, p) in points.iter().enumerate() {
                if tri.contains(&i) {
                    continue;
                }
                assert!(
                    !in_circumcircle(*p, a, b, c),
                    "point {} inside circumcircle of {:?}",
                    i,
                    tri
                );
            }
        }
    }

    #[test]
    fn test_triangle_count_for_general_position() {
        // For n points with h on the hull: triangles = 2n - h - 2
        let points = [
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 4.0],
            [0.0, 4.0],
            [2.0, 2.0],
        ];
        let triangles = delaunay_2d(&points);
        // n = 5, h = 4: expect 4 triangles
        assert_eq!(triangles.len(), 4);
    }
}
