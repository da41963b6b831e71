//! Nearest-neighbor search paths.
//!
//! Three modes, selected explicitly by the caller:
//!
//! - **brute**: exact linear scan over every committed embedding. The
//!   recall baseline, and the only mode that can see low-confidence atoms.
//! - **hybrid**: Phase 1 over-fetches candidates from the coarse spatial
//!   index, Phase 2 reranks them by exact full-dimension distance.
//! - **voronoi**: like hybrid, but the candidate set is first restricted
//!   to the query's partition cell (plus boundary-adjacent cells within a
//!   margin). A recall-for-speed trade the caller opts into.

use crate::{EmbeddingSource, Result};
use sema_vector::{exact_top_k, Metric, Neighbor};
use sema_spatial::{IndexGeneration, PartitionTable, VoronoiCell};

/// Search tuning knobs.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Number of results requested.
    pub k: usize,
    /// Metric for exact rerank (and brute-force scan).
    pub metric: Metric,
    /// Phase-1 candidate over-fetch as a multiple of k. Trades recall for
    /// latency; 10 is the documented floor for the stated recall target.
    pub over_fetch_factor: usize,
    /// Voronoi mode: widen the candidate set to cells whose boundary lies
    /// within this distance of the query.
    pub boundary_margin: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 10,
            metric: Metric::Cosine,
            over_fetch_factor: 10,
            boundary_margin: 0.0,
        }
    }
}

/// Whether a result set is complete or degraded, and why.
///
/// "No results" with `Complete` means the corpus genuinely has nothing;
/// `Degraded` means the search ran against less than the full corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Complete,
    Degraded { reason: String },
}

/// Ranked hits plus completeness status.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<Neighbor>,
    pub status: SearchStatus,
}

/// Exact linear scan over all committed embeddings.
pub fn brute_force_search(
    query: &[f32],
    k: usize,
    metric: Metric,
    source: &dyn EmbeddingSource,
) -> Result<SearchOutcome> {
    let atoms = source.embedded_atoms();
    let hits = exact_top_k(&atoms, query, metric, k, |atom| source.embedding(atom));
    Ok(SearchOutcome {
        hits,
        status: SearchStatus::Complete,
    })
}

/// Hybrid search: coarse over-fetch then exact rerank.
///
/// Phase 1 pulls `k * over_fetch_factor` candidates from the generation by
/// projected distance; Phase 2 reranks them at full dimensionality under
/// the configured metric. Atoms not present in the generation (pending
/// embedding, stale projection, low confidence) are invisible here, which
/// the caller reports through the outcome status.
pub fn hybrid_search(
    query: &[f32],
    query_coord: [f64; 3],
    params: &SearchParams,
    generation: &IndexGeneration,
    source: &dyn EmbeddingSource,
) -> Result<SearchOutcome> {
    let over_fetch = params.k.saturating_mul(params.over_fetch_factor).max(params.k);
    let candidates = generation.coarse_knn(query_coord, over_fetch);
    let candidate_count = candidates.len();

    let hits = exact_top_k(&candidates, query, params.metric, params.k, |atom| {
        source.embedding(atom)
    });

    tracing::debug!(
        k = params.k,
        over_fetch,
        candidates = candidate_count,
        hits = hits.len(),
        "hybrid search"
    );

    Ok(SearchOutcome {
        hits,
        status: SearchStatus::Complete,
    })
}

/// Voronoi partition-eliminated search.
///
/// Restricts candidates to the query's cell (plus any cell whose boundary
/// lies within `params.boundary_margin`), then exact-reranks. Selected
/// explicitly by the caller; never substituted for the hybrid path.
pub fn voronoi_search(
    query: &[f32],
    query_coord: [f64; 3],
    params: &SearchParams,
    generation: &IndexGeneration,
    partition: &PartitionTable,
    source: &dyn EmbeddingSource,
) -> Result<SearchOutcome> {
    let cells = partition.cells_within(query_coord, params.boundary_margin);

    let candidates: Vec<_> = generation
        .entries()
        .iter()
        .filter(|entry| cells.contains(&partition.membership(entry.coord).cell_id))
        .map(|entry| entry.atom)
        .collect();
    let candidate_count = candidates.len();

    let hits = exact_top_k(&candidates, query, params.metric, params.k, |atom| {
        source.embedding(atom)
    });

    tracing::debug!(
        k = params.k,
        cells = cells.len(),
        candidates = candidate_count,
        hits = hits.len(),
        "voronoi search"
    );

    Ok(SearchOutcome {
        hits,
        status: SearchStatus::Complete,
    })
}

/// Assign a projected query to its Voronoi cell.
pub fn voronoi_membership(coord: [f64; 3], partition: &PartitionTable) -> VoronoiCell {
    partition.membership(coord)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MapSource;
    use sema_spatial::{CurveKind, GenerationBuilder};
    use sema_vector::AtomId;

    /// Ten points on a line in 2D embedding space; projected coords mirror
    /// the line so coarse order equals exact order.
    fn line_fixture() -> (MapSource, IndexGeneration) {
        let source = MapSource::new((0..10).map(|i| (i, vec![i as f32, 0.0])));

        let mut builder = GenerationBuilder::new(1, 1, CurveKind::Morton, 100.0);
        for i in 0..10u64 {
            builder.insert(AtomId(i), [i as f64, 0.0, 0.0]);
        }
        (source, builder.seal())
    }

    #[test]
    fn test_brute_force_exact() {
        let (source, _) = line_fixture();
        let outcome = brute_force_search(&[0.2, 0.0], 3, Metric::Euclidean, &source).unwrap();

        assert_eq!(outcome.status, SearchStatus::Complete);
        let ids: Vec<_> = outcome.hits.iter().map(|h| h.atom).collect();
        assert_eq!(ids, vec![AtomId(0), AtomId(1), AtomId(2)]);
    }

    #[test]
    fn test_brute_force_self_query_distance_zero() {
        let (source, _) = line_fixture();
        let outcome = brute_force_search(&[4.0, 0.0], 1, Metric::Euclidean, &source).unwrap();
        assert_eq!(outcome.hits[0].atom, AtomId(4));
        assert!(outcome.hits[0].distance < 1e-6);
    }

    #[test]
    fn test_hybrid_matches_brute_on_faithful_projection() {
        let (source, generation) = line_fixture();
        let params = SearchParams {
            k: 3,
            metric: Metric::Euclidean,
            over_fetch_factor: 3,
            boundary_margin: 0.0,
        };

        let hybrid =
            hybrid_search(&[5.1, 0.0], [5.1, 0.0, 0.0], &params, &generation, &source).unwrap();
        let brute = brute_force_search(&[5.1, 0.0], 3, Metric::Euclidean, &source).unwrap();

        let hybrid_ids: Vec<_> = hybrid.hits.iter().map(|h| h.atom).collect();
        let brute_ids: Vec<_> = brute.hits.iter().map(|h| h.atom).collect();
        assert_eq!(hybrid_ids, brute_ids);
    }

    #[test]
    fn test_hybrid_over_fetch_bounds_candidates() {
        let (source, generation) = line_fixture();
        let params = SearchParams {
            k: 2,
            metric: Metric::Euclidean,
            over_fetch_factor: 1, // minimal over-fetch: candidates = k
            boundary_margin: 0.0,
        };

        let outcome =
            hybrid_search(&[0.0, 0.0], [0.0, 0.0, 0.0], &params, &generation, &source).unwrap();
        assert_eq!(outcome.hits.len(), 2);
    }

    #[test]
    fn test_hybrid_skips_candidates_without_embeddings() {
        let (_, generation) = line_fixture();
        // Only even atoms have embeddings
        let source = MapSource::new((0..10).step_by(2).map(|i| (i, vec![i as f32, 0.0])));

        let params = SearchParams {
            k: 3,
            metric: Metric::Euclidean,
            over_fetch_factor: 10,
            boundary_margin: 0.0,
        };
        let outcome =
            hybrid_search(&[0.0, 0.0], [0.0, 0.0, 0.0], &params, &generation, &source).unwrap();

        let ids: Vec<_> = outcome.hits.iter().map(|h| h.atom).collect();
        assert_eq!(ids, vec![AtomId(0), AtomId(2), AtomId(4)]);
    }

    #[test]
    fn test_voronoi_restricts_to_cell() {
        let (source, generation) = line_fixture();
        // Two cells: around the low end and the high end of the line
        let partition =
            PartitionTable::from_centroids(vec![[1.0, 0.0, 0.0], [8.0, 0.0, 0.0]]).unwrap();

        let params = SearchParams {
            k: 10,
            metric: Metric::Euclidean,
            over_fetch_factor: 10,
            boundary_margin: 0.0,
        };

        let outcome = voronoi_search(
            &[0.0, 0.0],
            [0.0, 0.0, 0.0],
            &params,
            &generation,
            &partition,
            &source,
        )
        .unwrap();

        // Only atoms in the low cell (0..=4) are candidates
        let ids: Vec<_> = outcome.hits.iter().map(|h| h.atom).collect();
        assert!(ids.iter().all(|id| id.0 <= 4), "got {:?}", ids);
        assert!(!ids.is_empty());
    }

    #[test]
    fn test_voronoi_boundary_margin_recovers_neighbors() {
        let (source, generation) = line_fixture();
        let partition =
            PartitionTable::from_centroids(vec![[1.0, 0.0, 0.0], [8.0, 0.0, 0.0]]).unwrap();

        // Query at the midpoint: without margin only one cell is searched,
        // with a wide margin both are
        let narrow = SearchParams {
            k: 10,
            metric: Metric::Euclidean,
            over_fetch_factor: 10,
            boundary_margin: 0.0,
        };
        let wide = SearchParams {
            boundary_margin: 10.0,
            ..narrow.clone()
        };

        let at_mid = [4.5, 0.0, 0.0];
        let narrow_hits = voronoi_search(&[4.5, 0.0], at_mid, &narrow, &generation, &partition, &source)
            .unwrap()
            .hits;
        let wide_hits = voronoi_search(&[4.5, 0.0], at_mid, &wide, &generation, &partition, &source)
            .unwrap()
            .hits;

        assert!(wide_hits.len() > narrow_hits.len());
        assert_eq!(wide_hits.len(), 10);
    }

    #[test]
    fn test_voronoi_membership_passthrough() {
        let partition =
            PartitionTable::from_centroids(vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]]).unwrap();
        let cell = voronoi_membership([1.0, 0.0, 0.0], &partition);
        assert_eq!(cell.cell_id, 0);
    }
}
