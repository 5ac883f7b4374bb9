//! Object storage
//!
//! Media bytes live behind [`ObjectStorage`]. Database rows keep the stored
//! URL; clients only ever see short-lived presigned links to it.

pub mod local;

pub use local::LocalObjectStorage;

use crate::models::MediaKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("URL does not belong to this storage: {0}")]
    ForeignUrl(String),

    #[error("Object not found")]
    NotFound,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Link has expired")]
    Expired,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
    pub size_bytes: u64,
}

/// A file received from a multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Size in MB as recorded on media rows
    pub fn size_mb(&self) -> f64 {
        self.bytes.len() as f64 / BYTES_PER_MB
    }

    pub fn extension(&self) -> String {
        extension_for(&self.filename, &self.content_type)
    }
}

const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject, StorageError>;

    /// Remove the object behind a stored URL. Missing objects are not an error.
    async fn delete(&self, url: &str) -> Result<(), StorageError>;

    fn presign(&self, url: &str, ttl: Duration) -> Result<PresignedUrl, StorageError>;
}

/// Presign `url`, falling back to the stored URL when it cannot be signed
/// (for example a default thumbnail hosted elsewhere).
pub fn presign_or_raw(storage: &dyn ObjectStorage, url: &str, ttl: Duration) -> String {
    match storage.presign(url, ttl) {
        Ok(signed) => signed.url,
        Err(e) => {
            tracing::debug!("Serving unsigned URL {}: {}", url, e);
            url.to_string()
        }
    }
}

/// `images/albums/album_{id}/{uuid}.{ext}` or the `videos/` equivalent
pub fn album_media_key(kind: MediaKind, album_id: i64, ext: &str) -> String {
    format!(
        "{}/albums/album_{}/{}.{}",
        kind.storage_prefix(),
        album_id,
        Uuid::new_v4(),
        ext
    )
}

pub fn avatar_key(user_id: i64, ext: &str) -> String {
    format!("images/profiles/user_{}/{}.{}", user_id, Uuid::new_v4(), ext)
}

pub fn temp_key(ext: &str) -> String {
    format!("temp/{}.{}", Uuid::new_v4(), ext)
}

/// Extension from the client file name, else from the MIME type
pub fn extension_for(filename: &str, content_type: &str) -> String {
    if let Some((_, ext)) = filename.rsplit_once('.') {
        if !ext.is_empty() && ext.len() < 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return ext.to_lowercase();
        }
    }

    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "bin",
    }
    .to_string()
}

/// MIME type for serving a stored object, by extension
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, e)| e.to_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
