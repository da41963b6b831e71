//! Vector search primitives for sema.
//!
//! This crate provides the foundation the rest of the engine builds on:
//!
//! - **Distance metrics**: Euclidean (L2), Cosine, Manhattan (L1)
//! - **`AtomId`**: the stable surrogate identifier shared by every store
//! - **`VectorIndex` trait**: common interface for exact and approximate indices
//! - **`ExactScanIndex`**: linear scan search, the exactness baseline
//!
//! # Architecture
//!
//! ```text
//! search(query, k) ── below threshold ──▶ ExactScanIndex (this crate)
//!                 └── above threshold ──▶ coarse filter + exact rerank
//!                                          (sema-spatial / sema-geo)
//! ```
//!
//! The exact scan is both the small-corpus fast path and the Phase-2 rerank
//! used to finalize candidates produced by the coarse spatial filter.
//!
//! # Example
//!
//! ```
//! use sema_vector::{AtomId, ExactScanIndex, Metric, VectorIndex};
//!
//! let index = ExactScanIndex::new(4, Metric::Euclidean);
//! index.insert(AtomId(1), &[1.0, 0.0, 0.0, 0.0]).unwrap();
//! index.insert(AtomId(2), &[0.0, 1.0, 0.0, 0.0]).unwrap();
//!
//! let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
//! assert_eq!(hits[0].atom, AtomId(1));
//! ```

mod distance;
mod scan;
mod traits;

pub use distance::{cosine_distance, euclidean_distance, euclidean_distance_squared, manhattan_distance, Metric};
pub use scan::{exact_top_k, ExactScanIndex};
pub use traits::{Neighbor, VectorIndex};

use serde::{Deserialize, Serialize};

/// Stable surrogate identifier for an atom.
///
/// Allocated monotonically by the atom store and never reused. Orderable so
/// that equidistant search results can be tie-broken deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AtomId(pub u64);

impl std::fmt::Display for AtomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "atom:{}", self.0)
    }
}

/// Error type for vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector not found: {0}")]
    NotFound(AtomId),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;
