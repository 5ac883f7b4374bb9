//! Filesystem-backed object storage
//!
//! Objects are written under a root directory and addressed as
//! `{public_base}/media/{key}`. A presigned link appends `expires` (unix
//! seconds) and `signature`, the base64url HMAC-SHA256 of `key:expires`.

use super::{ObjectStorage, PresignedUrl, StorageError, StoredObject};
use crate::config::StorageConfig;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;

type HmacSha256 = Hmac<Sha256>;

const MEDIA_PREFIX: &str = "/media/";

pub struct LocalObjectStorage {
    root: PathBuf,
    public_base: String,
    secret: Vec<u8>,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: &str, secret: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.path, &config.public_base_url, &config.signing_secret)
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}{}{}", self.public_base, MEDIA_PREFIX, key)
    }

    /// Key of a URL produced by [`Self::url_for`], ignoring any query string
    pub fn key_from_url<'a>(&self, url: &'a str) -> Result<&'a str, StorageError> {
        let without_query = url.split('?').next().unwrap_or(url);
        without_query
            .strip_prefix(self.public_base.as_str())
            .and_then(|rest| rest.strip_prefix(MEDIA_PREFIX))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))
    }

    /// Resolve a key to a path under the root, refusing traversal
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn mac_for(&self, key: &str, expires: i64) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| StorageError::InvalidSignature)?;
        mac.update(format!("{}:{}", key, expires).as_bytes());
        Ok(mac)
    }

    /// Check a presigned link's parameters against `now`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        let provided = BASE64URL_NOPAD
            .decode(signature.as_bytes())
            .map_err(|_| StorageError::InvalidSignature)?;

        self.mac_for(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature)?;

        if expires <= now.timestamp() {
            return Err(StorageError::Expired);
        }
        Ok(())
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        tracing::debug!("Stored {} ({} bytes, {})", key, bytes.len(), content_type);

        Ok(StoredObject {
            url: self.url_for(key),
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let key = self.key_from_url(url)?;
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn presign(&self, url: &str, ttl: Duration) -> Result<PresignedUrl, StorageError> {
        let key = self.key_from_url(url)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = BASE64URL_NOPAD.encode(&self.mac_for(key, expires)?.finalize().into_bytes());

        Ok(PresignedUrl {
            url: format!("{}?expires={}&signature={}", self.url_for(key), expires, signature),
            expires_at: Utc
                .timestamp_opt(expires, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> LocalObjectStorage {
        LocalObjectStorage::new(dir.path(), "http://cdn.test/", "secret")
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_read_delete() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);

        let stored = s.put("images/albums/album_1/a.png", b"png!", "image/png").await.unwrap();
        assert_eq!(stored.url, "http://cdn.test/media/images/albums/album_1/a.png");
        assert_eq!(stored.size_bytes, 4);
        assert_eq!(s.read(&stored.key).await.unwrap(), b"png!");

        s.delete(&stored.url).await.unwrap();
        assert!(matches!(s.read(&stored.key).await, Err(StorageError::NotFound)));
        // deleting twice is fine
        s.delete(&stored.url).await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);

        assert!(matches!(
            s.put("../escape.txt", b"x", "text/plain").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(s.read("/etc/passwd").await, Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_presign_then_verify() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        let url = s.url_for("images/x.png");

        let signed = s.presign(&url, Duration::from_secs(900)).unwrap();
        let expires: i64 = query_param(&signed.url, "expires").parse().unwrap();
        let signature = query_param(&signed.url, "signature");

        assert!(s.verify("images/x.png", expires, signature, Utc::now()).is_ok());
        assert!(matches!(
            s.verify("images/y.png", expires, signature, Utc::now()),
            Err(StorageError::InvalidSignature)
        ));
        assert!(matches!(
            s.verify("images/x.png", expires + 1, signature, Utc::now()),
            Err(StorageError::InvalidSignature)
        ));
        let later = Utc.timestamp_opt(expires + 1, 0).unwrap();
        assert!(matches!(
            s.verify("images/x.png", expires, signature, later),
            Err(StorageError::Expired)
        ));
    }

    #[test]
    fn test_presign_foreign_url_fails() {
        let dir = TempDir::new().unwrap();
        let s = storage(&dir);
        assert!(matches!(
            s.presign("https://elsewhere.test/a.png", Duration::from_secs(60)),
            Err(StorageError::ForeignUrl(_))
        ));
    }
}
