//! Collection service: one saga per write request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{DocumentId, UserId};
use saga::{
    Backoff, BlobStore, BlobUpload, Collector, DocumentStore, DocumentStoreError, SagaOrchestrator,
    Step, StepError, blob_delete_step, blob_upload_step, document_step, upload_all,
};
use serde_json::Value;

use crate::error::{CollectionError, Result};
use crate::model::{NewToy, PROFILES, Profile, ProfileChanges, TOYS, Toy, ToyChanges};

const UPLOAD_MEDIA: &str = "upload_media";
const UPLOAD_IMAGES: &str = "upload_images";
const UPLOAD_AVATAR: &str = "upload_avatar";
const WRITE_TOY: &str = "write_toy";
const WRITE_PROFILE: &str = "write_profile";
const DELETE_TOY_DOCUMENT: &str = "delete_toy_document";
const DELETE_REMOVED_IMAGES: &str = "delete_removed_images";
const DELETE_TOY_IMAGES: &str = "delete_toy_images";
const DELETE_PREVIOUS_AVATAR: &str = "delete_previous_avatar";

/// How the service builds its sagas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaOptions {
    /// Wrap document writes in a document-store transaction.
    pub use_transactions: bool,
    pub backoff: Backoff,
    /// Deadline for each step attempt.
    pub step_timeout: Option<Duration>,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            use_transactions: true,
            backoff: Backoff::default(),
            step_timeout: None,
        }
    }
}

/// Manages toys and profiles across a blob store and a document store.
pub struct CollectionService<B, D> {
    blobs: Arc<B>,
    documents: Arc<D>,
    options: SagaOptions,
}

impl<B, D> CollectionService<B, D>
where
    B: BlobStore + 'static,
    D: DocumentStore + 'static,
{
    /// Creates a service with default saga options.
    pub fn new(blobs: Arc<B>, documents: Arc<D>) -> Self {
        Self {
            blobs,
            documents,
            options: SagaOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SagaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn documents(&self) -> &Arc<D> {
        &self.documents
    }

    /// Adds a toy: uploads its media and images, then writes the document.
    #[tracing::instrument(skip(self, new_toy), fields(owner = %new_toy.owner_id))]
    pub async fn add_toy(&self, new_toy: NewToy) -> Result<Toy> {
        new_toy.validate()?;
        let NewToy {
            owner_id,
            name,
            description,
            media,
            images,
        } = new_toy;

        let id = DocumentId::new();
        let media_urls = Collector::new();
        let image_urls = Collector::new();

        let mut saga = self.saga("add_toy");
        let context = saga.context();
        saga.add_step(self.upload_step(UPLOAD_MEDIA, media, &media_urls));
        saga.add_step(self.upload_step(UPLOAD_IMAGES, images, &image_urls));

        let documents = self.documents.clone();
        let write = document_step(WRITE_TOY, move || {
            let documents = documents.clone();
            let context = context.clone();
            let media_urls = media_urls.clone();
            let image_urls = image_urls.clone();
            let name = name.trim().to_string();
            let description = description.clone();
            async move {
                let now = Utc::now();
                let toy = Toy {
                    id,
                    owner_id,
                    name,
                    description,
                    media: media_urls.snapshot().await,
                    images: image_urls.snapshot().await,
                    created_at: now,
                    updated_at: now,
                };
                let document = serde_json::to_value(&toy)?;
                documents
                    .insert(TOYS, id, document.clone(), context.session().await)
                    .await?;
                Ok::<Value, StepError>(document)
            }
        });
        let documents = self.documents.clone();
        saga.add_step(write.with_compensation(move || {
            let documents = documents.clone();
            async move {
                documents.delete(TOYS, id, None).await?;
                Ok::<(), StepError>(())
            }
        }));

        let output = saga.execute().await?;
        let toy: Toy = serde_json::from_value(output)?;
        tracing::info!(toy = %toy.id, "toy added");
        Ok(toy)
    }

    /// Edits a toy: uploads added files, replaces the document, then deletes
    /// the blobs that were detached.
    ///
    /// With transactions enabled the blob deletion runs before the commit.
    /// If the commit then fails, the restored document still lists the
    /// detached locators although their blobs are gone.
    #[tracing::instrument(skip(self, changes))]
    pub async fn edit_toy(&self, id: DocumentId, changes: ToyChanges) -> Result<Toy> {
        changes.validate()?;
        let previous_document = self
            .documents
            .find(TOYS, id)
            .await?
            .ok_or(CollectionError::ToyNotFound(id))?;
        let previous: Toy = serde_json::from_value(previous_document.clone())?;

        let ToyChanges {
            name,
            description,
            add_media,
            add_images,
            remove,
        } = changes;
        let removed = previous.attached(&remove);
        let media_urls = Collector::new();
        let image_urls = Collector::new();

        let mut saga = self.saga("edit_toy");
        let context = saga.context();
        if !add_media.is_empty() {
            saga.add_step(self.upload_step(UPLOAD_MEDIA, add_media, &media_urls));
        }
        if !add_images.is_empty() {
            saga.add_step(self.upload_step(UPLOAD_IMAGES, add_images, &image_urls));
        }

        let documents = self.documents.clone();
        let detached = removed.clone();
        let write_context = context.clone();
        let write = document_step(WRITE_TOY, move || {
            let documents = documents.clone();
            let context = write_context.clone();
            let media_urls = media_urls.clone();
            let image_urls = image_urls.clone();
            let mut toy = previous.clone();
            let name = name.clone();
            let description = description.clone();
            let detached = detached.clone();
            async move {
                if let Some(name) = name {
                    toy.name = name.trim().to_string();
                }
                if let Some(description) = description {
                    toy.description = description;
                }
                toy.detach(&detached);
                toy.media.extend(media_urls.snapshot().await);
                toy.images.extend(image_urls.snapshot().await);
                toy.updated_at = Utc::now();

                let document = serde_json::to_value(&toy)?;
                documents
                    .replace(TOYS, id, document.clone(), context.session().await)
                    .await?;
                Ok::<Value, StepError>(document)
            }
        });
        let documents = self.documents.clone();
        saga.add_step(write.with_compensation(move || {
            let documents = documents.clone();
            let previous = previous_document.clone();
            async move {
                documents.replace(TOYS, id, previous, None).await?;
                Ok::<(), StepError>(())
            }
        }));

        if !removed.is_empty() {
            saga.add_step(blob_delete_step(
                DELETE_REMOVED_IMAGES,
                self.blobs.clone(),
                removed,
            ));
        }

        saga.execute().await?;
        let document = context
            .get(WRITE_TOY)
            .await
            .ok_or(CollectionError::ToyNotFound(id))?;
        let toy: Toy = serde_json::from_value(document)?;
        tracing::info!(toy = %toy.id, "toy edited");
        Ok(toy)
    }

    /// Deletes a toy document, then its blobs. Returns the deleted toy.
    ///
    /// With transactions enabled the blobs are deleted before the commit.
    /// If the commit then fails, the toy document survives without its
    /// media and images.
    #[tracing::instrument(skip(self))]
    pub async fn delete_toy(&self, id: DocumentId) -> Result<Toy> {
        let previous_document = self
            .documents
            .find(TOYS, id)
            .await?
            .ok_or(CollectionError::ToyNotFound(id))?;
        let previous: Toy = serde_json::from_value(previous_document.clone())?;

        let mut saga = self.saga("delete_toy");
        let context = saga.context();

        let documents = self.documents.clone();
        let delete = document_step(DELETE_TOY_DOCUMENT, move || {
            let documents = documents.clone();
            let context = context.clone();
            async move {
                let existed = documents
                    .delete(TOYS, id, context.session().await)
                    .await?
                    .is_some();
                Ok::<Value, StepError>(Value::Bool(existed))
            }
        });
        let documents = self.documents.clone();
        saga.add_step(delete.with_compensation(move || {
            let documents = documents.clone();
            let previous = previous_document.clone();
            async move {
                match documents.insert(TOYS, id, previous, None).await {
                    // The aborted transaction already kept the document.
                    Ok(()) | Err(DocumentStoreError::Duplicate { .. }) => Ok(()),
                    Err(err) => Err(StepError::from(err)),
                }
            }
        }));

        let locators = previous.locators();
        if !locators.is_empty() {
            saga.add_step(blob_delete_step(
                DELETE_TOY_IMAGES,
                self.blobs.clone(),
                locators,
            ));
        }

        saga.execute().await?;
        tracing::info!(toy = %id, "toy deleted");
        Ok(previous)
    }

    /// Creates or updates a user's profile, replacing the avatar if one is
    /// supplied. The old avatar is deleted last.
    #[tracing::instrument(skip(self, changes))]
    pub async fn update_profile(
        &self,
        user_id: UserId,
        changes: ProfileChanges,
    ) -> Result<Profile> {
        changes.validate()?;
        let key = user_id.profile_key();
        let previous_document = self.documents.find(PROFILES, key).await?;
        let previous: Option<Profile> = previous_document
            .clone()
            .map(serde_json::from_value)
            .transpose()?;

        let avatar_urls = Collector::new();
        let mut saga = self.saga("update_profile");
        let context = saga.context();

        let replaces_avatar = changes.avatar.is_some();
        if let Some(avatar) = changes.avatar.clone() {
            saga.add_step(self.upload_step(UPLOAD_AVATAR, vec![avatar], &avatar_urls));
        }

        let documents = self.documents.clone();
        let write_context = context.clone();
        let current = previous.clone();
        let write = document_step(WRITE_PROFILE, move || {
            let documents = documents.clone();
            let context = write_context.clone();
            let avatar_urls = avatar_urls.clone();
            let changes = changes.clone();
            let current = current.clone();
            async move {
                let exists = current.is_some();
                let mut profile = current.unwrap_or_else(|| Profile::new(user_id));
                changes.apply_to(&mut profile);
                if let Some(avatar) = avatar_urls.snapshot().await.into_iter().next() {
                    profile.avatar = Some(avatar);
                }
                profile.updated_at = Utc::now();

                let document = serde_json::to_value(&profile)?;
                let session = context.session().await;
                if exists {
                    documents
                        .replace(PROFILES, key, document.clone(), session)
                        .await?;
                } else {
                    documents
                        .insert(PROFILES, key, document.clone(), session)
                        .await?;
                }
                Ok::<Value, StepError>(document)
            }
        });
        let documents = self.documents.clone();
        saga.add_step(write.with_compensation(move || {
            let documents = documents.clone();
            let previous = previous_document.clone();
            async move {
                match previous {
                    Some(previous) => {
                        documents.replace(PROFILES, key, previous, None).await?;
                    }
                    None => {
                        documents.delete(PROFILES, key, None).await?;
                    }
                }
                Ok::<(), StepError>(())
            }
        }));

        if replaces_avatar
            && let Some(old) = previous.and_then(|p| p.avatar)
        {
            saga.add_step(blob_delete_step(
                DELETE_PREVIOUS_AVATAR,
                self.blobs.clone(),
                vec![old],
            ));
        }

        saga.execute().await?;
        let document = context
            .get(WRITE_PROFILE)
            .await
            .ok_or(CollectionError::ProfileNotFound(user_id))?;
        let profile: Profile = serde_json::from_value(document)?;
        tracing::info!(user = %user_id, "profile updated");
        Ok(profile)
    }

    /// Loads a toy.
    pub async fn get_toy(&self, id: DocumentId) -> Result<Toy> {
        let document = self
            .documents
            .find(TOYS, id)
            .await?
            .ok_or(CollectionError::ToyNotFound(id))?;
        Ok(serde_json::from_value(document)?)
    }

    /// Loads a user's profile.
    pub async fn get_profile(&self, user_id: UserId) -> Result<Profile> {
        let document = self
            .documents
            .find(PROFILES, user_id.profile_key())
            .await?
            .ok_or(CollectionError::ProfileNotFound(user_id))?;
        Ok(serde_json::from_value(document)?)
    }

    fn saga(&self, label: &str) -> SagaOrchestrator {
        let saga = if self.options.use_transactions {
            SagaOrchestrator::transactional(label, self.documents.clone())
        } else {
            SagaOrchestrator::new(label)
        };
        saga.with_backoff(self.options.backoff)
            .with_step_timeout(self.options.step_timeout)
    }

    fn upload_step(&self, name: &str, files: Vec<BlobUpload>, collector: &Collector) -> Step {
        let blobs: Arc<dyn BlobStore> = self.blobs.clone();
        let uploader = blobs.clone();
        blob_upload_step(
            name,
            blobs,
            move |sink| {
                let uploader = uploader.clone();
                let files = files.clone();
                async move {
                    upload_all(uploader.as_ref(), files, &sink)
                        .await
                        .map_err(StepError::from)
                }
            },
            collector.clone(),
        )
    }
}

impl<B, D> std::fmt::Debug for CollectionService<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionService")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
