//! Multi-resolution spatial index over projected coordinates.
//!
//! A bounding-volume tree over `(x, y, z)` where each leaf entry carries a
//! locality key from a space-filling-curve encoding of the discretized
//! coordinate. Entries are stored in curve order, so physically co-located
//! atoms sit next to each other in memory and on disk.
//!
//! # Generations
//!
//! ```text
//! GenerationBuilder ──seal()──▶ IndexGeneration (immutable, Arc'd)
//!                                     │
//!                    GenerationHandle::swap  (pointer write)
//!                                     │
//!            readers ──snapshot()──▶ Arc clone, no lock held during query
//! ```
//!
//! Mutations accumulate in a builder and become visible only when a sealed
//! generation is swapped in. A query always runs against exactly one
//! immutable generation; no reader ever observes a half-built structure.
//! The index is a derived cache: it can always be rebuilt from the atom
//! store + embeddings + the current anchor set, and the on-disk snapshot
//! (see [`snapshot`]) is tagged `(generation_id, anchor_set_version)` so a
//! stale or corrupt snapshot is simply discarded and rebuilt.

pub mod bvh;
pub mod curve;
pub mod generation;
pub mod partition;
pub mod snapshot;

pub use bvh::{Aabb, Bvh, SpatialEntry};
pub use curve::{locality_key, morton_decode, CurveKind};
pub use generation::{GenerationBuilder, GenerationHandle, IndexGeneration};
pub use partition::{PartitionTable, VoronoiCell};

/// Error type for spatial index operations.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("No snapshot present in {0}")]
    SnapshotMissing(std::path::PathBuf),

    #[error("Coordinate outside bounding region: {0:?}")]
    OutOfRegion([f64; 3]),

    #[error("Partition table needs at least one centroid")]
    EmptyPartition,
}

/// Result type for spatial index operations.
pub type Result<T> = std::result::Result<T, SpatialError>;
