use crate::{
    blob::{AvatarUpload, BlobStore},
    entity::{PublicProfile, UserChanges, UserId},
    error::{Error, Result},
    store::Repository,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

/// Read and edit the caller's own profile.
pub struct ProfileManager {
    repo: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    public_base_url: String,
}

impl ProfileManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        blobs: Arc<dyn BlobStore>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            blobs,
            public_base_url: public_base_url.into(),
        }
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub async fn get_profile(&self, requester: UserId, id: UserId) -> Result<PublicProfile> {
        ensure_owner(requester, id)?;

        let user = self
            .repo
            .find_user_by_id(id)
            .await?
            .ok_or_else(user_not_found)?;
        Ok(user.public_profile(&self.public_base_url))
    }

    /// Apply the supplied fields. Blank text fields count as absent. A new
    /// avatar replaces the reference; the previous blob stays where it is.
    pub async fn update_profile(
        &self,
        requester: UserId,
        id: UserId,
        update: ProfileUpdate,
    ) -> Result<PublicProfile> {
        ensure_owner(requester, id)?;

        if self.repo.find_user_by_id(id).await?.is_none() {
            return Err(user_not_found());
        }

        let mut changes = UserChanges {
            username: non_blank(update.username),
            email: non_blank(update.email),
            avatar_ref: None,
        };

        if let Some(avatar) = &update.avatar {
            avatar.validate()?;
            changes.avatar_ref = Some(self.blobs.put(avatar).await?);
        }

        let user = self
            .repo
            .update_user(id, &changes)
            .await?
            .ok_or_else(user_not_found)?;

        info!(user_id = %id, avatar = changes.avatar_ref.is_some(), "profile updated");
        Ok(user.public_profile(&self.public_base_url))
    }
}

fn ensure_owner(requester: UserId, id: UserId) -> Result<()> {
    if requester != id {
        warn!(requester = %requester, target = %id, "rejected access to another user's profile");
        return Err(Error::Forbidden(
            "You can only access your own profile.".to_string(),
        ));
    }
    Ok(())
}

fn user_not_found() -> Error {
    Error::NotFound("User not found.".to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
