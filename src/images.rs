//! Product image storage.
//!
//! Handlers talk to an [`ImageStore`]; the default [`LocalImageStore`] writes
//! blobs below `media.root`, which `main` serves under `media.public_base`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::ImageUpload;

#[derive(Debug, thiserror::Error)]
pub enum ImageStoreError {
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image {name} is not a valid {declared} file")]
    ContentMismatch { name: String, declared: String },
    #[error("image {0} is empty")]
    Empty(String),
    #[error("image {name} exceeds {limit} bytes")]
    TooLarge { name: String, limit: usize },
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where an uploaded image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Opaque key used for deletion.
    pub key: String,
    /// Public URL clients can fetch.
    pub url: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, ImageStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError>;
}

/// Maps a declared content type to the extension we store it under.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

/// Extension matching the file's leading bytes, if it is a JPEG or PNG at all.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG_MAGIC) {
        Some("png")
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some("jpg")
    } else {
        None
    }
}

/// Checks type, emptiness, size and that the bytes really are the declared
/// format before anything is written.
pub fn check_upload(image: &ImageUpload, max_bytes: usize) -> Result<&'static str, ImageStoreError> {
    let ext = extension_for(&image.content_type)
        .ok_or_else(|| ImageStoreError::UnsupportedType(image.content_type.clone()))?;
    if image.bytes.is_empty() {
        return Err(ImageStoreError::Empty(image.file_name.clone()));
    }
    if image.bytes.len() > max_bytes {
        return Err(ImageStoreError::TooLarge { name: image.file_name.clone(), limit: max_bytes });
    }
    if sniff(&image.bytes) != Some(ext) {
        return Err(ImageStoreError::ContentMismatch {
            name: image.file_name.clone(),
            declared: image.content_type.clone(),
        });
    }
    Ok(ext)
}

pub struct LocalImageStore {
    root: PathBuf,
    public_base: String,
    max_bytes: usize,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base: &str, max_bytes: usize) -> Self {
        Self { root: root.into(), public_base: public_base.trim_end_matches('/').to_string(), max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        // Keys are generated as "<uuid>.<ext>"; anything else is refused.
        let valid = key
            .split_once('.')
            .map(|(stem, ext)| Uuid::parse_str(stem).is_ok() && (ext == "jpg" || ext == "png"))
            .unwrap_or(false);
        if !valid {
            return Err(ImageStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, ImageStoreError> {
        let ext = check_upload(image, self.max_bytes)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let key = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.path_for(&key)?;
        tokio::fs::write(&path, &image.bytes).await?;
        tracing::debug!(key = %key, bytes = image.bytes.len(), "stored image {}", image.file_name);
        Ok(StoredImage { url: format!("{}/{}", self.public_base, key), key })
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Uploads every image in order. On the first failure the ones already
/// stored are deleted again and the error is returned.
pub async fn upload_all(store: &dyn ImageStore, images: &[ImageUpload]) -> Result<Vec<StoredImage>, ImageStoreError> {
    let mut stored = Vec::with_capacity(images.len());
    for image in images {
        match store.upload(image).await {
            Ok(s) => stored.push(s),
            Err(e) => {
                tracing::error!("Image upload {} failed: {}", image.file_name, e);
                discard(store, &stored).await;
                return Err(e);
            }
        }
    }
    Ok(stored)
}

/// Best-effort removal; failures are logged, never returned.
pub async fn discard(store: &dyn ImageStore, images: &[StoredImage]) {
    let results = futures::future::join_all(images.iter().map(|img| store.delete(&img.key))).await;
    for (img, res) in images.iter().zip(results) {
        if let Err(e) = res {
            tracing::warn!("Failed to delete image {}: {}", img.key, e);
        }
    }
}
