//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod profiles;
pub mod toys;

use std::fmt::Display;
use std::str::FromStr;

use saga::BlobUpload;
use serde::Deserialize;

use crate::error::ApiError;

/// A file sent inline in a JSON request body.
#[derive(Debug, Deserialize)]
pub struct FileRequest {
    pub file_name: String,
    pub content_type: String,
    /// File content as text.
    pub data: String,
}

impl From<FileRequest> for BlobUpload {
    fn from(file: FileRequest) -> Self {
        BlobUpload::new(file.file_name, file.content_type, file.data.into_bytes())
    }
}

pub(crate) fn uploads(files: Vec<FileRequest>) -> Vec<BlobUpload> {
    files.into_iter().map(BlobUpload::from).collect()
}

pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
