//! Step factories for the two stores every write touches.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{StepError, StepResult};
use crate::services::{BlobStore, BlobStoreError, BlobUpload, DeleteOutcome};
use crate::step::Step;

/// Retries for steps built by [`blob_upload_step`] and [`blob_delete_step`].
pub const BLOB_STEP_RETRIES: u32 = 2;

/// Retries for steps built by [`document_step`].
pub const DOCUMENT_STEP_RETRIES: u32 = 3;

/// Locators uploaded by a step, shared with the code that built the saga.
///
/// Later steps read it to build their payload; the upload step's
/// compensation drains it. Only mutate it from step callbacks while the saga
/// is running.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    locators: Arc<Mutex<Vec<String>>>,
}

impl Collector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the collected locators.
    pub async fn snapshot(&self) -> Vec<String> {
        self.locators.lock().await.clone()
    }

    /// Appends locators.
    pub async fn extend(&self, locators: Vec<String>) {
        self.locators.lock().await.extend(locators);
    }

    /// Removes every locator.
    pub async fn clear(&self) {
        self.locators.lock().await.clear();
    }

    /// Removes the given locators, keeping the rest in order.
    pub async fn remove(&self, locators: &[String]) {
        self.locators.lock().await.retain(|l| !locators.contains(l));
    }

    /// Number of collected locators.
    pub async fn len(&self) -> usize {
        self.locators.lock().await.len()
    }

    /// Returns true if nothing has been collected.
    pub async fn is_empty(&self) -> bool {
        self.locators.lock().await.is_empty()
    }
}

/// Builds a step that uploads blobs and records their locators in `collector`.
///
/// `upload` receives a per-attempt sink and must record each locator in it
/// as soon as the blob is stored ([`upload_all`] does). On success the
/// returned locators move to `collector` and are returned as a JSON array.
/// After a failed attempt, including one cut short by a deadline, whatever
/// reached the sink is deleted so the next attempt starts clean. The
/// compensation bulk-deletes every locator in `collector`, then empties it.
pub fn blob_upload_step<F, Fut>(
    name: impl Into<String>,
    blobs: Arc<dyn BlobStore>,
    upload: F,
    collector: Collector,
) -> Step
where
    F: Fn(Collector) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<Vec<String>>> + Send + 'static,
{
    let name = name.into();
    let attempt = Collector::new();

    let execute = {
        let collector = collector.clone();
        let attempt = attempt.clone();
        move || {
            let collector = collector.clone();
            let attempt = attempt.clone();
            let pending = upload(attempt.clone());
            async move {
                let locators = pending.await?;
                attempt.clear().await;
                collector.extend(locators.clone()).await;
                Ok::<Value, StepError>(Value::from(locators))
            }
        }
    };

    let discard = {
        let blobs = blobs.clone();
        let step = name.clone();
        move || {
            let attempt = attempt.clone();
            let blobs = blobs.clone();
            let step = step.clone();
            async move {
                let orphans = attempt.snapshot().await;
                if orphans.is_empty() {
                    return Ok(());
                }
                blobs.delete(&orphans).await?;
                attempt.remove(&orphans).await;
                tracing::info!(
                    step = %step,
                    removed = orphans.len(),
                    "removed blobs left by failed attempt"
                );
                Ok::<(), StepError>(())
            }
        }
    };

    let compensate = {
        let step = name.clone();
        move || {
            let collector = collector.clone();
            let blobs = blobs.clone();
            let step = step.clone();
            async move {
                let locators = collector.snapshot().await;
                if locators.is_empty() {
                    tracing::debug!(step = %step, "no uploaded blobs to remove");
                    return Ok(());
                }

                let results = blobs.delete(&locators).await?;
                let missing = results
                    .iter()
                    .filter(|r| r.outcome == DeleteOutcome::NotFound)
                    .count();
                collector.clear().await;
                tracing::info!(
                    step = %step,
                    deleted = results.len() - missing,
                    missing,
                    "removed uploaded blobs"
                );
                Ok::<(), StepError>(())
            }
        }
    };

    Step::new(name, execute, compensate)
        .with_attempt_cleanup(discard)
        .with_retries(BLOB_STEP_RETRIES)
}

/// Builds a step that deletes blobs.
///
/// Deleted blobs cannot be restored, so the compensation only logs the loss.
/// Put this step after every step that might still fail where possible.
pub fn blob_delete_step(
    name: impl Into<String>,
    blobs: Arc<dyn BlobStore>,
    locators: Vec<String>,
) -> Step {
    let name = name.into();
    let count = locators.len();

    let execute = move || {
        let blobs = blobs.clone();
        let locators = locators.clone();
        async move {
            blobs.delete(&locators).await?;
            Ok::<Value, StepError>(Value::from(locators))
        }
    };

    let compensate = {
        let step = name.clone();
        move || {
            let step = step.clone();
            async move {
                tracing::warn!(
                    step = %step,
                    count,
                    "deleted blobs cannot be restored, nothing to compensate"
                );
                Ok::<(), StepError>(())
            }
        }
    };

    Step::new(name, execute, compensate).with_retries(BLOB_STEP_RETRIES)
}

/// Builds a step around one document-store operation.
///
/// The default compensation does nothing but log. Attach a real one with
/// [`Step::with_compensation`] when the operation creates, replaces or
/// removes data.
pub fn document_step<F, Fut>(name: impl Into<String>, operation: F) -> Step
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<Value>> + Send + 'static,
{
    let name = name.into();

    let compensate = {
        let step = name.clone();
        move || {
            let step = step.clone();
            async move {
                tracing::info!(step = %step, "no compensation registered for document step");
                Ok::<(), StepError>(())
            }
        }
    };

    Step::new(name, operation, compensate).with_retries(DOCUMENT_STEP_RETRIES)
}

/// Uploads a batch of files concurrently.
///
/// Each locator is recorded in `sink` the moment its upload finishes, so a
/// caller that abandons this future still knows what was stored. If any
/// upload fails, the uploads of the same batch that succeeded are deleted
/// and dropped from `sink` before the first error is returned.
pub async fn upload_all(
    blobs: &dyn BlobStore,
    files: Vec<BlobUpload>,
    sink: &Collector,
) -> Result<Vec<String>, BlobStoreError> {
    let uploads = files.into_iter().map(move |file| async move {
        let locator = blobs.upload(file).await?;
        sink.extend(vec![locator.clone()]).await;
        Ok::<String, BlobStoreError>(locator)
    });
    let results = join_all(uploads).await;

    let mut locators = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(locator) => locators.push(locator),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    let Some(err) = first_error else {
        return Ok(locators);
    };
    if !locators.is_empty() {
        match blobs.delete(&locators).await {
            Ok(_) => sink.remove(&locators).await,
            Err(cleanup) => tracing::warn!(
                error = %cleanup,
                orphaned = locators.len(),
                "failed to remove partial upload batch"
            ),
        }
    }
    Err(err)
}
