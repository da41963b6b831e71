//! Core traits for vector indices.
//!
//! The `VectorIndex` trait is the common interface implemented by the exact
//! scan baseline here and consumed by the routing layer above.

use crate::{AtomId, Result};

/// A neighbor returned from vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// The owning atom.
    pub atom: AtomId,
    /// Distance under the query's metric (lower = more similar).
    pub distance: f32,
}

impl Neighbor {
    /// Create a new neighbor.
    pub fn new(atom: AtomId, distance: f32) -> Self {
        Self { atom, distance }
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Distance first (total_cmp for NaN safety), then AtomId so that
        // equidistant results rank reproducibly across runs.
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.atom.cmp(&other.atom))
    }
}

/// Common interface for vector indices.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; internal synchronization is the
/// responsibility of each implementation.
pub trait VectorIndex: Send + Sync {
    /// Insert a vector for the given atom, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension doesn't match the index dimension
    /// or the vector contains NaN/Inf.
    fn insert(&self, atom: AtomId, vector: &[f32]) -> Result<()>;

    /// Remove an atom's vector. Returns `true` if it was present.
    fn remove(&self, atom: AtomId) -> Result<bool>;

    /// Search for the k nearest neighbors, sorted ascending by distance
    /// with ties broken by `AtomId`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Get an atom's vector, if present.
    fn get(&self, atom: AtomId) -> Result<Option<Vec<f32>>>;

    /// Check whether an atom has a vector in this index.
    fn contains(&self, atom: AtomId) -> bool;

    /// Number of vectors in the index.
    fn len(&self) -> usize;

    /// True if the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of vectors in this index.
    fn dimensions(&self) -> usize;
}
