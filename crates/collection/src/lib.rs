//! Toy collection and profile management.
//!
//! Every write that touches both the blob store and the document store is
//! built as a saga: uploads first, the document write next, irreversible
//! blob deletions last.

pub mod error;
pub mod model;
pub mod service;

pub use error::{CollectionError, Result};
pub use model::{NewToy, PROFILES, Profile, ProfileChanges, TOYS, Toy, ToyChanges};
pub use service::{CollectionService, SagaOptions};
