use crate::error::{Error, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// URL prefix under which stored blobs are served.
pub const UPLOADS_PREFIX: &str = "/uploads";

#[derive(Debug, Clone)]
pub struct AvatarUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AvatarUpload {
    pub fn validate(&self) -> Result<()> {
        let is_image = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(Error::Validation("Only image files are allowed.".to_string()));
        }
        if self.bytes.is_empty() {
            return Err(Error::Validation("Uploaded file is empty.".to_string()));
        }
        if self.bytes.len() > MAX_AVATAR_BYTES {
            return Err(Error::Validation(
                "Profile picture must be 5 MB or smaller.".to_string(),
            ));
        }
        Ok(())
    }

    /// Lower-cased alphanumeric extension of the original file name, with
    /// the leading dot.
    fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// Where uploaded avatars end up. Old blobs are never deleted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the upload and return the path clients can fetch it from.
    async fn put(&self, upload: &AvatarUpload) -> Result<String>;
}

/// Writes blobs into a directory that is served statically at
/// [`UPLOADS_PREFIX`].
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, upload: &AvatarUpload) -> Result<String> {
        upload.validate()?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .context("Failed to create upload directory")?;

        let simple = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}-{}{}",
            Utc::now().timestamp_millis(),
            &simple[..8],
            upload.extension()
        );
        let path = self.root.join(&file_name);

        tokio::fs::write(&path, &upload.bytes)
            .await
            .with_context(|| format!("Failed to write upload to {}", path.display()))?;

        debug!(path = %path.display(), bytes = upload.bytes.len(), "stored avatar");
        Ok(format!("{UPLOADS_PREFIX}/{file_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(bytes: usize) -> AvatarUpload {
        AvatarUpload {
            file_name: Some("Me.PNG".into()),
            content_type: Some("image/png".into()),
            bytes: vec![7; bytes],
        }
    }

    #[tokio::test]
    async fn stores_under_uploads_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path().join("uploads"));

        let reference = blobs.put(&png(16)).await.unwrap();
        assert!(reference.starts_with("/uploads/"));
        assert!(reference.ends_with(".png"));

        let file_name = reference.trim_start_matches("/uploads/");
        let written = std::fs::read(blobs.root().join(file_name)).unwrap();
        assert_eq!(written.len(), 16);
    }

    #[tokio::test]
    async fn consecutive_uploads_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::new(dir.path());
        let a = blobs.put(&png(1)).await.unwrap();
        let b = blobs.put(&png(1)).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_non_images_and_oversized_files() {
        let mut upload = png(1);
        upload.content_type = Some("application/pdf".into());
        assert!(matches!(upload.validate(), Err(Error::Validation(_))));

        upload.content_type = None;
        assert!(matches!(upload.validate(), Err(Error::Validation(_))));

        assert!(matches!(
            png(MAX_AVATAR_BYTES + 1).validate(),
            Err(Error::Validation(_))
        ));
        assert!(png(MAX_AVATAR_BYTES).validate().is_ok());
    }

    #[test]
    fn odd_extensions_are_dropped() {
        let mut upload = png(1);
        upload.file_name = Some("evil.p/ng".into());
        assert_eq!(upload.extension(), "");
        upload.file_name = None;
        assert_eq!(upload.extension(), "");
    }
}
