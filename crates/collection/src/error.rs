//! Collection error types.

use common::{DocumentId, UserId};
use saga::{DocumentStoreError, SagaError};
use thiserror::Error;

/// Errors returned by [`CollectionService`](crate::CollectionService).
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The write saga failed and was rolled back.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    /// A read from the document store failed.
    #[error("Document store error: {0}")]
    Document(#[from] DocumentStoreError),

    /// A stored document did not match the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Toy not found: {0}")]
    ToyNotFound(DocumentId),

    #[error("Profile not found for user {0}")]
    ProfileNotFound(UserId),

    /// The request was rejected before any step ran.
    #[error("Invalid input: {0}")]
    Invalid(String),
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;
