//! Density-based clustering.
//!
//! Classic DBSCAN with BFS region expansion. Atoms are visited in
//! ascending id order, so identical inputs always produce the same
//! partition into clusters and noise (cluster label values follow first
//! discovery order and are therefore stable too).
//!
//! `-1` labels noise. Budget exhaustion and cancellation both surface
//! explicitly; a truncated result is never passed off as a complete one.

use crate::{CancelToken, EmbeddingSource, GeoError, Result};
use sema_vector::{AtomId, Metric};
use std::collections::HashMap;

/// Noise label.
pub const NOISE: i32 = -1;

/// Clustering parameters.
#[derive(Debug, Clone)]
pub struct DbscanParams {
    /// Neighborhood radius.
    pub epsilon: f32,
    /// Minimum neighborhood size (self included) for a core point.
    pub min_points: usize,
    /// Distance metric.
    pub metric: Metric,
    /// Hard budget on region queries. 0 means unbounded.
    pub max_region_queries: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            min_points: 3,
            metric: Metric::Cosine,
            max_region_queries: 0,
        }
    }
}

/// Clustering result.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    /// Label per atom; `-1` is noise.
    pub labels: HashMap<AtomId, i32>,
    /// Number of clusters found.
    pub clusters: usize,
    /// True when the region-query budget ran out before all atoms were
    /// processed; unprocessed atoms are absent from `labels`.
    pub truncated: bool,
}

/// Cluster the given atoms by embedding density.
///
/// `scope` selects the atoms to cluster (typically all embedded atoms, or
/// a query-restricted subset). Read-only; cancellation aborts with
/// [`GeoError::Cancelled`] and leaves no partial mutation anywhere.
pub fn cluster_dbscan(
    scope: &[AtomId],
    params: &DbscanParams,
    source: &dyn EmbeddingSource,
    cancel: &CancelToken,
) -> Result<ClusterOutcome> {
    // Deterministic visiting order, independent of caller's ordering
    let mut atoms: Vec<AtomId> = scope.to_vec();
    atoms.sort();
    atoms.dedup();

    // Resolve embeddings once; atoms without one are skipped entirely
    let mut vectors: Vec<(AtomId, Vec<f32>)> = Vec::with_capacity(atoms.len());
    for &atom in &atoms {
        if let Some(vector) = source.embedding(atom) {
            vectors.push((atom, vector));
        }
    }

    let mut labels: HashMap<AtomId, i32> = HashMap::new();
    let mut next_cluster = 0i32;
    let mut region_queries = 0usize;
    let mut truncated = false;

    let budget_hit = |count: usize| params.max_region_queries > 0 && count >= params.max_region_queries;

    'outer: for i in 0..vectors.len() {
        if cancel.is_cancelled() {
            return Err(GeoError::Cancelled);
        }

        let (atom, _) = &vectors[i];
        if labels.contains_key(atom) {
            continue;
        }

        if budget_hit(region_queries) {
            truncated = true;
            break;
        }
        region_queries += 1;
        let neighborhood = region(&vectors, i, params);

        if neighborhood.len() < params.min_points {
            labels.insert(*atom, NOISE);
            continue;
        }

        // New cluster seeded at a core point
        let cluster = next_cluster;
        next_cluster += 1;
        labels.insert(*atom, cluster);

        // BFS over the neighborhood
        let mut queue: Vec<usize> = neighborhood;
        let mut head = 0;
        while head < queue.len() {
            if cancel.is_cancelled() {
                return Err(GeoError::Cancelled);
            }

            let j = queue[head];
            head += 1;
            let (neighbor_atom, _) = &vectors[j];

            match labels.get(neighbor_atom) {
                Some(&NOISE) => {
                    // Border point previously dismissed as noise
                    labels.insert(*neighbor_atom, cluster);
                    continue;
                }
                Some(_) => continue,
                None => {}
            }

            labels.insert(*neighbor_atom, cluster);

            if budget_hit(region_queries) {
                truncated = true;
                break 'outer;
            }
            region_queries += 1;
            let expansion = region(&vectors, j, params);

            if expansion.len() >= params.min_points {
                // Core point: its neighborhood joins the frontier
                for candidate in expansion {
                    if !queue.contains(&candidate) {
                        queue.push(candidate);
                    }
                }
            }
        }
    }

    let clusters = next_cluster as usize;
    let noise = labels.values().filter(|&&l| l == NOISE).count();
    tracing::debug!(
        atoms = vectors.len(),
        clusters,
        noise,
        region_queries,
        truncated,
        "dbscan finished"
    );

    Ok(ClusterOutcome {
        labels,
        clusters,
        truncated,
    })
}

/// Indices of all points within epsilon of point `i` (self included).
fn region(vectors: &[(AtomId, Vec<f32>)], i: usize, params: &DbscanParams) -> Vec<usize> {
    let (_, center) = &vectors[i];
    vectors
        .iter()
        .enumerate()
        .filter(|(_, (_, v))| params.metric.distance(center, v) <= params.epsilon)
        .map(|(j, _)| j)
        .collect()
}
