use crate::jobs::JobId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Content rejected: {0}")]
    ContentValidation(String),

    #[error("Atom store error: {0}")]
    Atom(#[from] sema_atom::AtomError),

    #[error("Anchor error: {0}")]
    Anchor(#[from] sema_anchor::AnchorError),

    #[error("Spatial index error: {0}")]
    Spatial(#[from] sema_spatial::SpatialError),

    #[error("Algorithm error: {0}")]
    Geo(#[from] sema_geo::GeoError),

    #[error("Vector error: {0}")]
    Vector(#[from] sema_vector::VectorError),

    #[error("Embedder unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("No partition table built; call build_partitions first")]
    NoPartitionTable,

    #[error("Unknown job: {0:?}")]
    UnknownJob(JobId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
