//! Content-addressable atom store.
//!
//! Atoms are the smallest deduplicated unit of ingested data. Identical
//! content never produces two atoms: a second insert of the same canonical
//! bytes increments the existing atom's reference count and reports
//! `created = false` — that is the success path deduplication exists for,
//! not an error.
//!
//! # Durability
//!
//! Every mutation appends to an edit log before touching memory:
//!
//! ```text
//! put/release/commit_embedding/relate
//!         │ append [len][bincode record][crc32c]
//!         ▼
//!   atoms.log ──replay on open──▶ in-memory maps
//! ```
//!
//! The log is the system of record for atoms, embeddings, and relations.
//! The spatial index is *not* recovered from it; the index is a derived
//! cache rebuilt from this store plus the anchor set.
//!
//! # Concurrency
//!
//! The hash-unique constraint is the only mutation point needing
//! serialization, and it is per content hash: concurrent `put`s of
//! different content proceed in parallel through different lock stripes,
//! while two concurrent `put`s of identical content serialize on the same
//! stripe and resolve to one atom with `ref_count == 2`.

mod hash;
mod log;
mod store;

pub use hash::{canonicalize, content_hash, ContentHash};
pub use log::{AtomLog, LogRecord};
pub use store::{AtomRecord, AtomRelation, AtomStore, Embedding};

use sema_vector::AtomId;
use serde::{Deserialize, Serialize};

/// Payload modality. Decides canonicalization before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Hashed after whitespace trim and newline normalization.
    Text,
    /// Hashed byte-for-byte.
    Binary,
}

/// Error type for the atom store.
#[derive(Debug, thiserror::Error)]
pub enum AtomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log corrupt: {0}")]
    LogCorrupt(String),

    #[error("Unknown atom: {0}")]
    UnknownAtom(AtomId),

    #[error("Atom {0} has no remaining references")]
    NoReferences(AtomId),

    #[error("Embedding dimension {actual} does not match existing {expected}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),
}

/// Result type for the atom store.
pub type Result<T> = std::result::Result<T, AtomError>;
