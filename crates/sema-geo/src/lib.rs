//! Geometric and graph algorithms over the spatial index and atom store.
//!
//! Consumers of the index, never mutators: every algorithm here reads one
//! immutable generation snapshot plus the embedding store and produces a
//! result, so cancellation can never leave partial state behind.
//!
//! - [`search`]: brute-force, hybrid (coarse filter + exact rerank), and
//!   Voronoi partition-eliminated nearest-neighbor search
//! - [`astar`]: A* pathfinding over the implicit KNN graph
//! - [`dbscan`]: density clustering with an explicit truncation status
//! - [`hull`] / [`delaunay`]: 2D convex hull and triangulation for
//!   downstream visualization and mesh consumers

pub mod astar;
pub mod dbscan;
pub mod delaunay;
pub mod hull;
pub mod search;

pub use astar::{semantic_path, PathParams, PathResult};
pub use dbscan::{cluster_dbscan, ClusterOutcome, DbscanParams};
pub use delaunay::delaunay_2d;
pub use hull::convex_hull_2d;
pub use search::{
    brute_force_search, hybrid_search, voronoi_membership, voronoi_search, SearchOutcome,
    SearchParams, SearchStatus,
};

use sema_vector::AtomId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error type for the algorithm suite.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("Vector error: {0}")]
    Vector(#[from] sema_vector::VectorError),

    #[error("No embedding committed for {0}")]
    MissingEmbedding(AtomId),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for the algorithm suite.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Cooperative cancellation signal.
///
/// Cloned into long-running algorithms; they poll it between expansion
/// steps and bail out with [`GeoError::Cancelled`]. Since all algorithms
/// here are read-only, cancellation leaves no partial mutations anywhere.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Resolves atoms to full-dimension embedding vectors.
///
/// Implemented by the engine over the atom store; tests implement it over
/// plain maps.
pub trait EmbeddingSource: Send + Sync {
    /// The atom's committed embedding, if any.
    fn embedding(&self, atom: AtomId) -> Option<Vec<f32>>;

    /// All atoms with a committed embedding, ascending by id.
    fn embedded_atoms(&self) -> Vec<AtomId>;

    /// Number of embedded atoms.
    fn embedded_len(&self) -> usize;
}

/// Supplies typed, weighted edges for pathfinding.
///
/// The unit impl provides "no explicit relations" for purely geometric
/// pathfinding.
pub trait RelationSource: Send + Sync {
    /// Outgoing edges of an atom as `(target, weight)`.
    fn neighbors(&self, atom: AtomId) -> Vec<(AtomId, f32)>;
}

impl RelationSource for () {
    fn neighbors(&self, _atom: AtomId) -> Vec<(AtomId, f32)> {
        Vec::new()
    }
}
