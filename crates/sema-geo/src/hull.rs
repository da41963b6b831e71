//! 2D convex hull.
//!
//! Andrew's monotone chain over caller-supplied 2D projections. Not on the
//! ingestion-critical path; consumed by visualization and mesh tooling.

/// Convex hull of a 2D point set, counter-clockwise, starting from the
/// lowest-leftmost point. Collinear boundary points are dropped. Inputs
/// with fewer than three distinct points return what there is.
pub fn convex_hull_2d(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut sorted: Vec<[f64; 2]> = points.to_vec();
    sorted.sort_by(|a, b| a[0].total_cmp(&b[0]).then_with(|| a[1].total_cmp(&b[1])));
    sorted.dedup();

    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<[f64; 2]> = Vec::with_capacity(sorted.len() * 2);

    // Lower chain
    for &p in &sorted {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }

    // Upper chain
    let lower_len = hull.len() + 1;
    for &p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }

    hull.pop(); // closing point duplicates the start
    hull
}

/// Cross product of (b - a) × (c - a); positive = left turn.
fn cross(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}
