//! In-process saga orchestration for writes that span a blob store and a
//! document store.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensating action. Steps run sequentially with per-step retry; the run
//! can be wrapped in a document-store transaction. When a step exhausts its
//! retries, the transaction is aborted and completed steps are compensated
//! in reverse order of completion before the original error is returned.
//!
//! ```text
//! upload_media ──► upload_images ──► write_toy
//!      ▲                ▲               │ fails after retries
//!      └── compensate ◄─┴── compensate ◄┘ (abort transaction first)
//! ```
//!
//! Blob uploads are never covered by the transaction; they are only undone
//! by their compensation. Blob deletions cannot be undone at all.

pub mod audit;
pub mod backoff;
pub mod builders;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod state;
pub mod step;

pub use audit::{SagaHistory, StepRecord, StepStatus};
pub use backoff::Backoff;
pub use builders::{
    BLOB_STEP_RETRIES, Collector, DOCUMENT_STEP_RETRIES, blob_delete_step, blob_upload_step,
    document_step, upload_all,
};
pub use context::SagaContext;
pub use error::{SagaError, StepError, StepResult, StepTimeout};
pub use orchestrator::SagaOrchestrator;
pub use services::{
    BlobStore, BlobStoreError, BlobUpload, DeleteOutcome, DeleteResult, Document,
    DocumentSession, DocumentStore, DocumentStoreError, InMemoryBlobStore, InMemoryDocumentStore,
    SessionId, SessionProvider,
};
pub use state::SagaState;
pub use step::{DEFAULT_RETRIES, SagaStep, Step};
