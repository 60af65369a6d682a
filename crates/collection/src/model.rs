//! Toys and profiles as stored in the document store.

use chrono::{DateTime, Utc};
use common::{DocumentId, UserId};
use saga::BlobUpload;
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, Result};

/// Collection holding toy documents.
pub const TOYS: &str = "toys";

/// Collection holding profile documents, keyed by [`UserId::profile_key`].
pub const PROFILES: &str = "profiles";

/// A collection item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toy {
    pub id: DocumentId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    /// Locators of attached media (videos, documents).
    pub media: Vec<String>,
    /// Locators of attached images.
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Toy {
    /// Every blob locator attached to the toy, media first.
    pub fn locators(&self) -> Vec<String> {
        self.media.iter().chain(&self.images).cloned().collect()
    }

    /// The subset of `locators` that is actually attached to the toy.
    pub fn attached(&self, locators: &[String]) -> Vec<String> {
        self.locators()
            .into_iter()
            .filter(|l| locators.contains(l))
            .collect()
    }

    /// Removes the given locators from media and images.
    pub fn detach(&mut self, locators: &[String]) {
        self.media.retain(|l| !locators.contains(l));
        self.images.retain(|l| !locators.contains(l));
    }
}

/// A user's public profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub bio: String,
    /// Locator of the avatar image.
    pub avatar: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Creates an empty profile for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: String::new(),
            bio: String::new(),
            avatar: None,
            updated_at: Utc::now(),
        }
    }
}

/// Request to add a toy.
#[derive(Debug, Clone)]
pub struct NewToy {
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub media: Vec<BlobUpload>,
    pub images: Vec<BlobUpload>,
}

impl NewToy {
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            description: String::new(),
            media: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_media(mut self, file: BlobUpload) -> Self {
        self.media.push(file);
        self
    }

    pub fn with_image(mut self, file: BlobUpload) -> Self {
        self.images.push(file);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_files(self.media.iter().chain(&self.images))
    }
}

/// Request to edit a toy. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ToyChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub add_media: Vec<BlobUpload>,
    pub add_images: Vec<BlobUpload>,
    /// Locators to detach and delete. Locators not attached to the toy are
    /// ignored.
    pub remove: Vec<String>,
}

impl ToyChanges {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        validate_files(self.add_media.iter().chain(&self.add_images))
    }
}

/// Request to update a profile. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// Replaces the current avatar.
    pub avatar: Option<BlobUpload>,
}

impl ProfileChanges {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(name) = &self.display_name
            && name.trim().is_empty()
        {
            return Err(CollectionError::Invalid(
                "display name cannot be blank".to_string(),
            ));
        }
        validate_files(self.avatar.iter())
    }

    /// Applies the text fields to `profile`.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(display_name) = &self.display_name {
            profile.display_name = display_name.trim().to_string();
        }
        if let Some(bio) = &self.bio {
            profile.bio = bio.clone();
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CollectionError::Invalid("name cannot be blank".to_string()));
    }
    Ok(())
}

fn validate_files<'a>(files: impl Iterator<Item = &'a BlobUpload>) -> Result<()> {
    for file in files {
        if file.file_name.trim().is_empty() {
            return Err(CollectionError::Invalid("file name cannot be blank".to_string()));
        }
        if file.bytes.is_empty() {
            return Err(CollectionError::Invalid(format!(
                "file '{}' is empty",
                file.file_name
            )));
        }
    }
    Ok(())
}
