//! External collaborators touched by saga steps, with in-memory implementations.

pub mod blob;
pub mod document;

pub use blob::{
    BlobStore, BlobStoreError, BlobUpload, DeleteOutcome, DeleteResult, InMemoryBlobStore,
};
pub use document::{
    Document, DocumentSession, DocumentStore, DocumentStoreError, InMemoryDocumentStore,
    SessionId, SessionProvider,
};
