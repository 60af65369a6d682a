//! Shared identifier types used across the toy-collection crates.

pub mod types;

pub use types::{DocumentId, UserId};
