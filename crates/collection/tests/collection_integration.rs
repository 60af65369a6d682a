//! Integration tests for collection writes over in-memory stores.

use std::sync::Arc;

use collection::{
    CollectionError, CollectionService, NewToy, PROFILES, ProfileChanges, SagaOptions, TOYS,
    ToyChanges,
};
use common::{DocumentId, UserId};
use saga::{
    Backoff, BlobStore, BlobUpload, DocumentStore, InMemoryBlobStore, InMemoryDocumentStore,
    SagaError,
};

type Service = CollectionService<InMemoryBlobStore, InMemoryDocumentStore>;

struct Fixture {
    service: Service,
    blobs: InMemoryBlobStore,
    documents: InMemoryDocumentStore,
}

fn fixture(use_transactions: bool) -> Fixture {
    let blobs = InMemoryBlobStore::new();
    let documents = InMemoryDocumentStore::new();
    let service = CollectionService::new(Arc::new(blobs.clone()), Arc::new(documents.clone()))
        .with_options(SagaOptions {
            use_transactions,
            backoff: Backoff::None,
            step_timeout: None,
        });
    Fixture {
        service,
        blobs,
        documents,
    }
}

fn png(name: &str) -> BlobUpload {
    BlobUpload::new(name, "image/png", b"png".to_vec())
}

fn failed_step(err: &CollectionError) -> Option<&str> {
    match err {
        CollectionError::Saga(saga) => saga.failed_step(),
        _ => None,
    }
}

fn robot(owner: UserId) -> NewToy {
    NewToy::new(owner, "Robot")
        .with_description("tin, 1962")
        .with_media(png("manual.pdf"))
        .with_image(png("front.png"))
        .with_image(png("back.png"))
}

#[tokio::test]
async fn test_add_toy_uploads_and_writes_document() {
    let f = fixture(true);
    let owner = UserId::new();

    let toy = f.service.add_toy(robot(owner)).await.unwrap();

    assert_eq!(toy.owner_id, owner);
    assert_eq!(toy.media.len(), 1);
    assert_eq!(toy.images.len(), 2);
    assert_eq!(f.blobs.blob_count().await, 3);
    assert_eq!(f.documents.document_count(TOYS).await, 1);
    assert_eq!(f.documents.commit_count().await, 1);
    assert_eq!(f.documents.active_sessions().await, 0);
    assert_eq!(f.service.get_toy(toy.id).await.unwrap(), toy);
}

#[tokio::test]
async fn test_add_toy_recovers_from_transient_upload_failure() {
    let f = fixture(true);
    f.blobs.fail_next_uploads(1).await;

    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();

    assert_eq!(toy.images.len(), 2);
    assert_eq!(f.blobs.blob_count().await, 3);
}

#[tokio::test]
async fn test_add_toy_write_failure_removes_uploads() {
    for use_transactions in [true, false] {
        let f = fixture(use_transactions);
        f.documents.fail_next_writes(4).await;

        let err = f.service.add_toy(robot(UserId::new())).await.unwrap_err();

        assert_eq!(failed_step(&err), Some("write_toy"));
        assert!(matches!(
            &err,
            CollectionError::Saga(SagaError::StepFailed { attempts: 4, .. })
        ));
        assert_eq!(f.blobs.blob_count().await, 0);
        assert_eq!(f.documents.document_count(TOYS).await, 0);
        assert_eq!(f.documents.active_sessions().await, 0);
    }
}

#[tokio::test]
async fn test_add_toy_commit_failure_compensates_everything() {
    let f = fixture(true);
    f.documents.set_fail_on_commit(true).await;

    let err = f.service.add_toy(robot(UserId::new())).await.unwrap_err();

    assert!(matches!(
        err,
        CollectionError::Saga(SagaError::Transaction(_))
    ));
    assert_eq!(f.blobs.blob_count().await, 0);
    assert_eq!(f.documents.document_count(TOYS).await, 0);
}

#[tokio::test]
async fn test_edit_toy_replaces_images() {
    let f = fixture(true);
    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
    let front = toy.images[0].clone();
    let stranger = f.blobs.upload(png("other.png")).await.unwrap();

    let changes = ToyChanges {
        name: Some("Space Robot".to_string()),
        add_images: vec![png("side.png")],
        remove: vec![front.clone(), stranger.clone()],
        ..Default::default()
    };
    let edited = f.service.edit_toy(toy.id, changes).await.unwrap();

    assert_eq!(edited.name, "Space Robot");
    assert_eq!(edited.description, "tin, 1962");
    assert_eq!(edited.images.len(), 2);
    assert!(!edited.images.contains(&front));
    assert!(!f.blobs.has_blob(&front).await);
    // Not attached to this toy, so left alone.
    assert!(f.blobs.has_blob(&stranger).await);
    assert_eq!(f.service.get_toy(toy.id).await.unwrap(), edited);
}

#[tokio::test]
async fn test_edit_toy_write_failure_keeps_old_state() {
    let f = fixture(true);
    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
    let front = toy.images[0].clone();
    f.documents.fail_next_writes(4).await;

    let changes = ToyChanges {
        add_images: vec![png("side.png")],
        remove: vec![front.clone()],
        ..Default::default()
    };
    let err = f.service.edit_toy(toy.id, changes).await.unwrap_err();

    assert_eq!(failed_step(&err), Some("write_toy"));
    assert_eq!(f.service.get_toy(toy.id).await.unwrap(), toy);
    // The new upload was compensated and the deletion never ran.
    assert_eq!(f.blobs.blob_count().await, 3);
    assert!(f.blobs.has_blob(&front).await);
}

#[tokio::test]
async fn test_edit_toy_restores_document_when_deletion_fails() {
    for use_transactions in [true, false] {
        let f = fixture(use_transactions);
        let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
        f.blobs.set_fail_on_delete(true).await;

        let changes = ToyChanges {
            description: Some("restored".to_string()),
            remove: vec![toy.images[0].clone()],
            ..Default::default()
        };
        let err = f.service.edit_toy(toy.id, changes).await.unwrap_err();

        assert_eq!(failed_step(&err), Some("delete_removed_images"));
        assert_eq!(f.service.get_toy(toy.id).await.unwrap(), toy);
    }
}

#[tokio::test]
async fn test_delete_toy_removes_document_and_blobs() {
    let f = fixture(true);
    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();

    let deleted = f.service.delete_toy(toy.id).await.unwrap();

    assert_eq!(deleted, toy);
    assert_eq!(f.blobs.blob_count().await, 0);
    assert!(matches!(
        f.service.get_toy(toy.id).await,
        Err(CollectionError::ToyNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_toy_reinserts_document_when_blob_deletion_fails() {
    for use_transactions in [true, false] {
        let f = fixture(use_transactions);
        let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
        f.blobs.set_fail_on_delete(true).await;

        let err = f.service.delete_toy(toy.id).await.unwrap_err();

        assert_eq!(failed_step(&err), Some("delete_toy_images"));
        assert_eq!(f.service.get_toy(toy.id).await.unwrap(), toy);
        assert_eq!(f.blobs.blob_count().await, 3);
    }
}

#[tokio::test]
async fn test_edit_toy_commit_failure_keeps_document_but_not_removed_blob() {
    let f = fixture(true);
    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
    let front = toy.images[0].clone();
    f.documents.set_fail_on_commit(true).await;

    let changes = ToyChanges {
        name: Some("Space Robot".to_string()),
        remove: vec![front.clone()],
        ..Default::default()
    };
    let err = f.service.edit_toy(toy.id, changes).await.unwrap_err();

    assert!(matches!(
        err,
        CollectionError::Saga(SagaError::Transaction(_))
    ));
    let stored = f.service.get_toy(toy.id).await.unwrap();
    assert_eq!(stored, toy);
    // The deletion ran before the commit and cannot be undone.
    assert!(stored.images.contains(&front));
    assert!(!f.blobs.has_blob(&front).await);
}

#[tokio::test]
async fn test_delete_toy_commit_failure_keeps_document_without_blobs() {
    let f = fixture(true);
    let toy = f.service.add_toy(robot(UserId::new())).await.unwrap();
    f.documents.set_fail_on_commit(true).await;

    let err = f.service.delete_toy(toy.id).await.unwrap_err();

    assert!(matches!(
        err,
        CollectionError::Saga(SagaError::Transaction(_))
    ));
    assert_eq!(f.service.get_toy(toy.id).await.unwrap(), toy);
    assert_eq!(f.blobs.blob_count().await, 0);
}

#[tokio::test]
async fn test_toy_without_files_skips_blob_steps() {
    let f = fixture(false);
    let toy = f
        .service
        .add_toy(NewToy::new(UserId::new(), "Marble"))
        .await
        .unwrap();
    assert!(toy.locators().is_empty());

    f.blobs.set_fail_on_delete(true).await;
    f.service.delete_toy(toy.id).await.unwrap();
    assert_eq!(f.documents.document_count(TOYS).await, 0);
}

#[tokio::test]
async fn test_update_profile_creates_then_replaces_avatar() {
    let f = fixture(true);
    let user = UserId::new();

    let created = f
        .service
        .update_profile(
            user,
            ProfileChanges {
                display_name: Some("Ana".to_string()),
                bio: Some("collects robots".to_string()),
                avatar: Some(png("me.png")),
            },
        )
        .await
        .unwrap();
    let first_avatar = created.avatar.clone().unwrap();
    assert_eq!(f.documents.document_count(PROFILES).await, 1);

    let updated = f
        .service
        .update_profile(
            user,
            ProfileChanges {
                avatar: Some(png("me-2024.png")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.display_name, "Ana");
    assert_eq!(updated.bio, "collects robots");
    assert_ne!(updated.avatar.as_deref(), Some(first_avatar.as_str()));
    assert!(!f.blobs.has_blob(&first_avatar).await);
    assert_eq!(f.blobs.blob_count().await, 1);
    assert_eq!(f.service.get_profile(user).await.unwrap(), updated);
}

#[tokio::test]
async fn test_update_profile_text_only_keeps_avatar() {
    let f = fixture(false);
    let user = UserId::new();
    f.service
        .update_profile(
            user,
            ProfileChanges {
                avatar: Some(png("me.png")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let updated = f
        .service
        .update_profile(
            user,
            ProfileChanges {
                bio: Some("new bio".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(updated.avatar.is_some());
    assert_eq!(f.blobs.blob_count().await, 1);
}

#[tokio::test]
async fn test_failed_first_profile_write_leaves_nothing_behind() {
    let f = fixture(false);
    let user = UserId::new();
    f.documents.fail_next_writes(4).await;

    let err = f
        .service
        .update_profile(
            user,
            ProfileChanges {
                display_name: Some("Ana".to_string()),
                avatar: Some(png("me.png")),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(failed_step(&err), Some("write_profile"));
    assert_eq!(f.blobs.blob_count().await, 0);
    assert!(matches!(
        f.service.get_profile(user).await,
        Err(CollectionError::ProfileNotFound(_))
    ));
}

#[tokio::test]
async fn test_profile_is_stored_under_the_user_key() {
    let f = fixture(true);
    let user = UserId::new();
    f.service
        .update_profile(
            user,
            ProfileChanges {
                display_name: Some("Ana".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = f
        .documents
        .find(PROFILES, user.profile_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["display_name"], "Ana");
    assert!(
        f.documents
            .find(PROFILES, DocumentId::new())
            .await
            .unwrap()
            .is_none()
    );
}
