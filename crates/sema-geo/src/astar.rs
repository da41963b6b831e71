//! Semantic pathfinding.
//!
//! A* over an implicit graph: nodes are atoms, and each expansion derives
//! up to `max_neighbors` successor edges by exact KNN from the frontier
//! node, plus any explicit relations the atom carries. Edge cost is the
//! metric distance between the endpoints; the heuristic is the metric
//! distance to the goal embedding.
//!
//! For true metrics (Euclidean, Manhattan) the heuristic is admissible and
//! the returned path is optimal over the explored graph. Cosine distance on
//! unnormalized vectors is not a metric; there the result is best-effort,
//! not provably shortest.

use crate::{CancelToken, EmbeddingSource, GeoError, RelationSource, Result};
use sema_vector::{exact_top_k, AtomId, Metric};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Pathfinding parameters.
#[derive(Debug, Clone)]
pub struct PathParams {
    /// Metric for edge costs and the goal heuristic.
    pub metric: Metric,
    /// Successor edges generated per expansion.
    pub max_neighbors: usize,
    /// Hard expansion budget. Exhaustion is an explicit result, never a
    /// silent empty success.
    pub max_expansions: usize,
    /// Reaching any node within this distance of the goal embedding counts
    /// as arrival.
    pub epsilon: f32,
}

impl Default for PathParams {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            max_neighbors: 8,
            max_expansions: 1_000,
            epsilon: 0.0,
        }
    }
}

/// Outcome of a pathfinding run.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResult {
    /// Path from start to the terminal node (inclusive) and its cost.
    Found { path: Vec<AtomId>, cost: f32 },
    /// The reachable graph was exhausted without touching the goal.
    NoPath,
    /// The expansion budget ran out first.
    BudgetExceeded { expansions: usize },
}

/// Frontier entry ordered by f-score, ties by atom id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    f_score: f32,
    atom: AtomId,
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.f_score
            .total_cmp(&other.f_score)
            .then_with(|| self.atom.cmp(&other.atom))
    }
}

/// Find a path from `start` to `goal` through embedding space.
///
/// Terminates on: reaching `goal`, reaching a node within
/// `params.epsilon` of the goal embedding, exhausting the reachable graph
/// (`NoPath`), or exhausting `params.max_expansions` (`BudgetExceeded`).
/// Cancellation aborts with [`GeoError::Cancelled`]; the algorithm is
/// read-only so nothing is left half-mutated.
pub fn semantic_path(
    start: AtomId,
    goal: AtomId,
    params: &PathParams,
    source: &dyn EmbeddingSource,
    relations: &dyn RelationSource,
    cancel: &CancelToken,
) -> Result<PathResult> {
    let goal_vector = source
        .embedding(goal)
        .ok_or(GeoError::MissingEmbedding(goal))?;
    let start_vector = source
        .embedding(start)
        .ok_or(GeoError::MissingEmbedding(start))?;

    let all_atoms = source.embedded_atoms();

    let mut open: BinaryHeap<Reverse<Frontier>> = BinaryHeap::new();
    let mut g_score: HashMap<AtomId, f32> = HashMap::new();
    let mut came_from: HashMap<AtomId, AtomId> = HashMap::new();

    g_score.insert(start, 0.0);
    open.push(Reverse(Frontier {
        f_score: params.metric.distance(&start_vector, &goal_vector),
        atom: start,
    }));

    let mut expansions = 0usize;

    while let Some(Reverse(current)) = open.pop() {
        if cancel.is_cancelled() {
            return Err(GeoError::Cancelled);
        }

        let current_g = g_score[&current.atom];

        // Stale heap entry: a better route to this atom was already expanded
        if current.f_score > current_g + heuristic(current.atom, &goal_vector, params, source) + 1e-6
        {
            continue;
        }

        let current_vector = match source.embedding(current.atom) {
            Some(v) => v,
            None => continue,
        };

        // Arrival: exact goal, or close enough
        let to_goal = params.metric.distance(&current_vector, &goal_vector);
        if current.atom == goal || to_goal <= params.epsilon {
            let path = reconstruct(&came_from, current.atom);
            tracing::debug!(expansions, cost = current_g, hops = path.len(), "path found");
            return Ok(PathResult::Found {
                path,
                cost: current_g,
            });
        }

        if expansions >= params.max_expansions {
            tracing::debug!(expansions, "path budget exceeded");
            return Ok(PathResult::BudgetExceeded { expansions });
        }
        expansions += 1;

        // Successors: KNN from the current node plus explicit relations
        let knn = exact_top_k(
            &all_atoms,
            &current_vector,
            params.metric,
            params.max_neighbors + 1, // the node itself ranks first
            |atom| source.embedding(atom),
        );

        let mut successors: Vec<AtomId> = knn
            .into_iter()
            .filter(|n| n.atom != current.atom)
            .take(params.max_neighbors)
            .map(|n| n.atom)
            .collect();

        // Relation edges widen connectivity; strongest first, same budget
        let mut related = relations.neighbors(current.atom);
        related.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        successors.extend(
            related
                .into_iter()
                .take(params.max_neighbors)
                .map(|(target, _)| target),
        );

        for successor in successors {
            let successor_vector = match source.embedding(successor) {
                Some(v) => v,
                None => continue,
            };
            let tentative_g =
                current_g + params.metric.distance(&current_vector, &successor_vector);

            let better = g_score
                .get(&successor)
                .map(|&g| tentative_g < g)
                .unwrap_or(true);
            if better {
                g_score.insert(successor, tentative_g);
                came_from.insert(successor, current.atom);
                open.push(Reverse(Frontier {
                    f_score: tentative_g
                        + params.metric.distance(&successor_vector, &goal_vector),
                    atom: successor,
                }));
            }
        }
    }

    tracing::debug!(expansions, "no path");
    Ok(PathResult::NoPath)
}

fn heuristic(
    atom: AtomId,
    goal_vector: &[f32],
    params: &PathParams,
    source: &dyn EmbeddingSource,
) -> f32 {
    source
        .embedding(atom)
        .map(|v| params.metric.distance(&v, goal_vector))
        .unwrap_or(f32::MAX)
}

fn reconstruct(came_from: &HashMap<AtomId, AtomId>, terminal: AtomId) -> Vec<AtomId> {
    let mut path = vec![terminal];
    let mut current = terminal;
    while let Some(&previous) = came_from.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MapSource;

    /// A chain of points along one axis: 0 — 1 — 2 — ... — 9.
    fn chain_source() -> MapSource {
        MapSource::new((0..10).map(|i| (i, vec![i as f32, 0.0])))
    }

    fn params(metric: Metric) -> PathParams {
        PathParams {
            metric,
            max_neighbors: 2,
            max_expansions: 100,
            epsilon: 0.0,
        }
    }

    #[test]
    fn test_path_along_chain() {
        let source = chain_source();
        let cancel = CancelToken::new();

        let result = semantic_path(
            AtomId(0),
            AtomId(9),
            &params(Metric::Euclidean),
            &source,
            &(),
            &cancel,
        )
        .unwrap();

        match result {
            PathResult::Found { path, cost } => {
                assert_eq!(path.first(), Some(&AtomId(0)));
                assert_eq!(path.last(), Some(&AtomId(9)));
                // Straight-line chain: total cost equals endpoint distance
                assert!((cost - 9.0).abs() < 1e-4, "cost {}", cost);
            }
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn test_trivial_path_start_is_goal() {
        let source = chain_source();
        let result = semantic_path(
            AtomId(3),
            AtomId(3),
            &params(Metric::Euclidean),
            &source,
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(
            result,
            PathResult::Found {
                path: vec![AtomId(3)],
                cost: 0.0
            }
        );
    }

    #[test]
    fn test_budget_exceeded_is_explicit() {
        let source = chain_source();
        let strict = PathParams {
            metric: Metric::Euclidean,
            max_neighbors: 2,
            max_expansions: 2,
            epsilon: 0.0,
        };

        let result = semantic_path(
            AtomId(0),
            AtomId(9),
            &strict,
            &source,
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(matches!(result, PathResult::BudgetExceeded { .. }));
    }

    #[test]
    fn test_no_path_to_disconnected_island() {
        // Two tight clusters separated by a gulf; with 1 neighbor per
        // expansion the far island is unreachable from the near one.
        let mut pairs: Vec<(u64, Vec<f32>)> =
            (0..3).map(|i| (i, vec![i as f32 * 0.1, 0.0])).collect();
        pairs.push((100, vec![1000.0, 0.0]));
        let source = MapSource::new(pairs);

        let narrow = PathParams {
            metric: Metric::Euclidean,
            max_neighbors: 1,
            max_expansions: 50,
            epsilon: 0.0,
        };

        let result = semantic_path(
            AtomId(0),
            AtomId(100),
            &narrow,
            &source,
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        // Either the frontier dries up or the budget trips; both are
        // explicit, neither is a silent empty success.
        assert!(
            matches!(result, PathResult::NoPath | PathResult::BudgetExceeded { .. }),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_relations_bridge_gaps() {
        // Same island layout, but an explicit relation bridges the gulf
        struct Bridge;
        impl RelationSource for Bridge {
            fn neighbors(&self, atom: AtomId) -> Vec<(AtomId, f32)> {
                if atom == AtomId(2) {
                    vec![(AtomId(100), 1.0)]
                } else {
                    Vec::new()
                }
            }
        }

        let mut pairs: Vec<(u64, Vec<f32>)> =
            (0..3).map(|i| (i, vec![i as f32 * 0.1, 0.0])).collect();
        pairs.push((100, vec![1000.0, 0.0]));
        let source = MapSource::new(pairs);

        let result = semantic_path(
            AtomId(0),
            AtomId(100),
            &PathParams {
                metric: Metric::Euclidean,
                max_neighbors: 2,
                max_expansions: 100,
                epsilon: 0.0,
            },
            &source,
            &Bridge,
            &CancelToken::new(),
        )
        .unwrap();

        match result {
            PathResult::Found { path, .. } => {
                assert_eq!(path.last(), Some(&AtomId(100)));
                assert!(path.contains(&AtomId(2)), "bridge node used: {:?}", path);
            }
            other => panic!("expected bridged path, got {:?}", other),
        }
    }

    #[test]
    fn test_epsilon_arrival() {
        let source = chain_source();
        let relaxed = PathParams {
            metric: Metric::Euclidean,
            max_neighbors: 2,
            max_expansions: 100,
            epsilon: 1.5, // nodes 8 and 9 are both "at" the goal
        };

        let result = semantic_path(
            AtomId(0),
            AtomId(9),
            &relaxed,
            &source,
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        match result {
            PathResult::Found { path, .. } => {
                let terminal = *path.last().unwrap();
                assert!(terminal == AtomId(8) || terminal == AtomId(9));
            }
            other => panic!("expected epsilon arrival, got {:?}", other),
        }
    }

    #[test]
    fn test_cancellation() {
        let source = chain_source();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = semantic_path(
            AtomId(0),
            AtomId(9),
            &params(Metric::Euclidean),
            &source,
            &(),
            &cancel,
        );

        assert!(matches!(result, Err(GeoError::Cancelled)));
    }

    #[test]
    fn test_missing_embedding_is_error() {
        let source = chain_source();
        let result = semantic_path(
            AtomId(0),
            AtomId(999),
            &params(Metric::Euclidean),
            &source,
            &(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(GeoError::MissingEmbedding(_))));
    }

    #[test]
    fn test_terminates_on_dense_clique() {
        // Fully connected neighborhood; must terminate regardless
        let source = MapSource::new((0..30).map(|i| {
            let angle = i as f32 * 0.21;
            (i, vec![angle.cos(), angle.sin()])
        }));

        let result = semantic_path(
            AtomId(0),
            AtomId(29),
            &PathParams {
                metric: Metric::Euclidean,
                max_neighbors: 5,
                max_expansions: 500,
                epsilon: 0.0,
            },
            &source,
            &(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(!matches!(result, PathResult::NoPath));
    }
}
