//! Profile endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use collection::{Profile, ProfileChanges};
use common::UserId;
use saga::BlobUpload;
use serde::{Deserialize, Serialize};

use super::{FileRequest, parse_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<FileRequest>,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub display_name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub updated_at: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            user_id: profile.user_id.to_string(),
            display_name: profile.display_name,
            bio: profile.bio,
            avatar: profile.avatar,
            updated_at: profile.updated_at.to_rfc3339(),
        }
    }
}

/// GET /users/{id}/profile
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user_id: UserId = parse_id(&id)?;
    let profile = state.collection.get_profile(user_id).await?;
    Ok(Json(profile.into()))
}

/// PUT /users/{id}/profile: create or update, optionally replacing the avatar.
#[tracing::instrument(skip(state, req))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user_id: UserId = parse_id(&id)?;
    let changes = ProfileChanges {
        display_name: req.display_name,
        bio: req.bio,
        avatar: req.avatar.map(BlobUpload::from),
    };

    let profile = state.collection.update_profile(user_id, changes).await?;
    Ok(Json(profile.into()))
}
