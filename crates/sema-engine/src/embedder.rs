//! The external embedder boundary.
//!
//! The embedding model is a collaborator, not a component: the engine
//! consumes it as an opaque async function with a timeout and bounded
//! retries. Embedder failure never rolls back an atom — the atom stays
//! durable and simply remains absent from spatial queries until a retry
//! succeeds.

use async_trait::async_trait;
use sema_atom::Modality;

/// Errors an embedder implementation may surface.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedder unavailable: {0}")]
    Unavailable(String),

    #[error("embedder rejected content: {0}")]
    Rejected(String),
}

/// An external embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed raw content into a fixed-dimension vector.
    async fn embed(
        &self,
        content: &[u8],
        modality: Modality,
    ) -> std::result::Result<Vec<f32>, EmbedError>;

    /// Identifier recorded on every committed embedding.
    fn model_id(&self) -> &str;
}
