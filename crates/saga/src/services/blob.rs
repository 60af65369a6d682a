//! Blob store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// A file to be uploaded to the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUpload {
    /// Original file name supplied by the client.
    pub file_name: String,
    /// MIME type of the content.
    pub content_type: String,
    /// Raw file content.
    pub bytes: Vec<u8>,
}

impl BlobUpload {
    /// Creates a new upload.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// What happened to one locator in a bulk delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The blob existed and was removed.
    Deleted,
    /// Nothing was stored under the locator. Not an error.
    NotFound,
}

/// Per-locator result of [`BlobStore::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub locator: String,
    pub outcome: DeleteOutcome,
}

/// Errors raised by a blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The store could not be reached or refused the request.
    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a specific file.
    #[error("Upload of '{file_name}' rejected: {reason}")]
    Rejected { file_name: String, reason: String },
}

/// Trait for media storage operations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads a file and returns the locator (URL) it can be fetched from.
    async fn upload(&self, file: BlobUpload) -> Result<String, BlobStoreError>;

    /// Deletes every locator, best effort. Missing locators are reported as
    /// [`DeleteOutcome::NotFound`] rather than failing the call.
    async fn delete(&self, locators: &[String]) -> Result<Vec<DeleteResult>, BlobStoreError>;
}

const IN_MEMORY_BASE_URL: &str = "memory://blobs";

#[derive(Debug, Default)]
struct InMemoryBlobState {
    blobs: HashMap<String, BlobUpload>,
    next_id: u32,
    upload_attempts: u32,
    delete_calls: u32,
    fail_next_uploads: u32,
    fail_on_delete: bool,
}

/// In-memory blob store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    state: Arc<RwLock<InMemoryBlobState>>,
}

impl InMemoryBlobStore {
    /// Creates a new in-memory blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` upload calls fail.
    pub async fn fail_next_uploads(&self, count: u32) {
        self.state.write().await.fail_next_uploads = count;
    }

    /// Configures the store to fail every delete call.
    pub async fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().await.fail_on_delete = fail;
    }

    /// Returns the number of stored blobs.
    pub async fn blob_count(&self) -> usize {
        self.state.read().await.blobs.len()
    }

    /// Returns true if a blob is stored under the locator.
    pub async fn has_blob(&self, locator: &str) -> bool {
        self.state.read().await.blobs.contains_key(locator)
    }

    /// Returns how many upload calls were made, including failed ones.
    pub async fn upload_attempts(&self) -> u32 {
        self.state.read().await.upload_attempts
    }

    /// Returns how many delete calls were made, including failed ones.
    pub async fn delete_calls(&self) -> u32 {
        self.state.read().await.delete_calls
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, file: BlobUpload) -> Result<String, BlobStoreError> {
        let mut state = self.state.write().await;
        state.upload_attempts += 1;

        if state.fail_next_uploads > 0 {
            state.fail_next_uploads -= 1;
            return Err(BlobStoreError::Unavailable(
                "upload endpoint timed out".to_string(),
            ));
        }

        if file.bytes.is_empty() {
            return Err(BlobStoreError::Rejected {
                file_name: file.file_name,
                reason: "empty file".to_string(),
            });
        }

        state.next_id += 1;
        let locator = format!("{IN_MEMORY_BASE_URL}/{:04}/{}", state.next_id, file.file_name);
        state.blobs.insert(locator.clone(), file);

        Ok(locator)
    }

    async fn delete(&self, locators: &[String]) -> Result<Vec<DeleteResult>, BlobStoreError> {
        let mut state = self.state.write().await;
        state.delete_calls += 1;

        if state.fail_on_delete {
            return Err(BlobStoreError::Unavailable(
                "delete endpoint unavailable".to_string(),
            ));
        }

        let results = locators
            .iter()
            .map(|locator| {
                let outcome = match state.blobs.remove(locator) {
                    Some(_) => DeleteOutcome::Deleted,
                    None => DeleteOutcome::NotFound,
                };
                DeleteResult {
                    locator: locator.clone(),
                    outcome,
                }
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: &str) -> BlobUpload {
        BlobUpload::new(name, "image/png", b"\x89PNG".to_vec())
    }

    #[tokio::test]
    async fn test_upload_and_delete() {
        let store = InMemoryBlobStore::new();

        let locator = store.upload(png("robot.png")).await.unwrap();
        assert_eq!(locator, "memory://blobs/0001/robot.png");
        assert!(store.has_blob(&locator).await);
        assert_eq!(store.blob_count().await, 1);

        let results = store.delete(std::slice::from_ref(&locator)).await.unwrap();
        assert_eq!(
            results,
            vec![DeleteResult {
                locator: locator.clone(),
                outcome: DeleteOutcome::Deleted,
            }]
        );
        assert_eq!(store.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_locator_is_not_an_error() {
        let store = InMemoryBlobStore::new();
        let results = store
            .delete(&["memory://blobs/9999/ghost.png".to_string()])
            .await
            .unwrap();
        assert_eq!(results[0].outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_fail_next_uploads_counts_down() {
        let store = InMemoryBlobStore::new();
        store.fail_next_uploads(2).await;

        assert!(store.upload(png("a.png")).await.is_err());
        assert!(store.upload(png("a.png")).await.is_err());
        assert!(store.upload(png("a.png")).await.is_ok());
        assert_eq!(store.upload_attempts().await, 3);
        assert_eq!(store.blob_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let store = InMemoryBlobStore::new();
        let err = store
            .upload(BlobUpload::new("empty.png", "image/png", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_fail_on_delete_keeps_blobs() {
        let store = InMemoryBlobStore::new();
        let locator = store.upload(png("a.png")).await.unwrap();
        store.set_fail_on_delete(true).await;

        assert!(store.delete(&[locator.clone()]).await.is_err());
        assert!(store.has_blob(&locator).await);
        assert_eq!(store.delete_calls().await, 1);
    }
}
