//! Anchor sets and trilateration projection.
//!
//! Maps a high-dimensional embedding to a bounded 3D coordinate by measuring
//! its distance to a fixed set of anchor vectors and solving for the point
//! whose distances to the anchors' reduced-space positions best match:
//!
//! ```text
//! embedding ──metric distance──▶ [r₀, r₁, ..., rₖ]
//!                                      │
//!                      k == 3: closed-form two-circle solve
//!                      k  > 3: Gauss-Newton least squares
//!                                      ▼
//!                            (x, y, z) ∈ [-R, R]³
//! ```
//!
//! The projection is lossy by design: it preserves coarse neighborhood
//! structure approximately, which is all the spatial coarse filter needs.
//! Exact ranking always happens at full dimensionality downstream.
//!
//! Anchor sets are immutable once published. Publishing a new set starts a
//! new version; projections record the version they were computed under and
//! are excluded from queries against newer generations until reprojected.

mod project;
mod set;

pub use project::{project, Confidence, Projection};
pub use set::{AnchorRegistry, AnchorSet};

use sema_vector::AtomId;

/// Error type for anchor and projection operations.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("Anchor set needs at least 3 anchors, got {0}")]
    TooFewAnchors(usize),

    #[error("Anchor dimension mismatch: anchor {index} has {actual}, expected {expected}")]
    AnchorDimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid anchor vector: {0}")]
    InvalidAnchor(String),

    #[error("Unknown anchor set version: {0}")]
    UnknownVersion(u32),

    #[error("No anchor set published yet")]
    NoActiveSet,

    #[error("No projection recorded for {0}")]
    MissingProjection(AtomId),
}

/// Result type for anchor operations.
pub type Result<T> = std::result::Result<T, AnchorError>;
