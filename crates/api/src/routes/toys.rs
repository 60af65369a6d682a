//! Toy endpoints. Every write runs as a saga in the collection service.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use collection::{NewToy, Toy, ToyChanges};
use common::{DocumentId, UserId};
use serde::{Deserialize, Serialize};

use super::{FileRequest, parse_id, uploads};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateToyRequest {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media: Vec<FileRequest>,
    #[serde(default)]
    pub images: Vec<FileRequest>,
}

#[derive(Deserialize)]
pub struct EditToyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub add_media: Vec<FileRequest>,
    #[serde(default)]
    pub add_images: Vec<FileRequest>,
    /// Locators to detach and delete.
    #[serde(default)]
    pub remove: Vec<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ToyResponse {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    pub media: Vec<String>,
    pub images: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Toy> for ToyResponse {
    fn from(toy: Toy) -> Self {
        Self {
            id: toy.id.to_string(),
            owner_id: toy.owner_id.to_string(),
            name: toy.name,
            description: toy.description,
            media: toy.media,
            images: toy.images,
            created_at: toy.created_at.to_rfc3339(),
            updated_at: toy.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /toys: upload files and store a new toy.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateToyRequest>,
) -> Result<(StatusCode, Json<ToyResponse>), ApiError> {
    let owner_id: UserId = parse_id(&req.owner_id)?;
    let new_toy = NewToy {
        owner_id,
        name: req.name,
        description: req.description,
        media: uploads(req.media),
        images: uploads(req.images),
    };

    let toy = state.collection.add_toy(new_toy).await?;
    Ok((StatusCode::CREATED, Json(toy.into())))
}

/// GET /toys/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ToyResponse>, ApiError> {
    let id: DocumentId = parse_id(&id)?;
    let toy = state.collection.get_toy(id).await?;
    Ok(Json(toy.into()))
}

/// PATCH /toys/{id}: change fields, attach new files, detach old ones.
#[tracing::instrument(skip(state, req))]
pub async fn edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EditToyRequest>,
) -> Result<Json<ToyResponse>, ApiError> {
    let id: DocumentId = parse_id(&id)?;
    let changes = ToyChanges {
        name: req.name,
        description: req.description,
        add_media: uploads(req.add_media),
        add_images: uploads(req.add_images),
        remove: req.remove,
    };

    let toy = state.collection.edit_toy(id, changes).await?;
    Ok(Json(toy.into()))
}

/// DELETE /toys/{id}: remove the toy and its files.
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: DocumentId = parse_id(&id)?;
    state.collection.delete_toy(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
