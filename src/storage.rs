use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::models::now_millis;

/// Mount point under which stored blobs are served as static files.
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Local blob directory standing in for object storage: write-once puts
/// under generated keys, publicly resolvable URLs, delete-by-URL for the
/// post-deletion cascade.
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn from_env() -> Self {
        let root = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
        BlobStore { root: PathBuf::from(root) }
    }

    /// Decodes a base64 image payload, tolerating a data-URL prefix.
    pub fn decode_image(payload: &str) -> Result<Vec<u8>, String> {
        let raw = match payload.split_once("base64,") {
            Some((_, rest)) => rest,
            None => payload,
        };
        BASE64
            .decode(raw.trim())
            .map_err(|e| format!("Invalid image data: {}", e))
    }

    /// Stores a product image under `product_images/{timestamp}.jpg`. The
    /// timestamp is bumped past any key already on disk, so back-to-back
    /// uploads within one millisecond still get distinct keys.
    pub async fn put_product_image(&self, data: &[u8]) -> Result<String, std::io::Error> {
        let mut stamp = now_millis();
        let mut key = format!("product_images/{}.jpg", stamp);
        while self.path_for(&key).exists() {
            stamp += 1;
            key = format!("product_images/{}.jpg", stamp);
        }
        self.put(&key, data).await
    }

    /// Stores a profile photo under a fixed per-user key; re-uploading
    /// overwrites the previous photo.
    pub async fn put_profile_photo(&self, user_id: &str, data: &[u8]) -> Result<String, std::io::Error> {
        self.put(&format!("profile_images/{}/profile.jpg", user_id), data).await
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<String, std::io::Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(url_for(key))
    }

    /// Removes the blob behind a previously returned download URL. URLs
    /// that do not point into the upload mount are refused.
    pub async fn delete_by_url(&self, url: &str) -> Result<(), std::io::Error> {
        let Some(key) = key_for(url) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not an upload URL",
            ));
        };
        tokio::fs::remove_file(self.path_for(&key)).await
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub fn url_for(key: &str) -> String {
    format!("{}/{}", PUBLIC_PREFIX, key)
}

/// Maps a public download URL back to its storage key.
pub fn key_for(url: &str) -> Option<String> {
    let rest = url.strip_prefix("/uploads/")?;
    if rest.is_empty() || rest.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return None;
    }
    Some(rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        (dir, BlobStore { root })
    }

    #[test]
    fn urls_round_trip_to_keys() {
        let key = "product_images/1700000000000.jpg";
        assert_eq!(key_for(&url_for(key)).as_deref(), Some(key));
    }

    #[test]
    fn foreign_urls_are_refused() {
        assert_eq!(key_for("https://example.com/x.jpg"), None);
        assert_eq!(key_for("/uploads/"), None);
        assert_eq!(key_for("/uploads/../etc/passwd"), None);
        assert_eq!(key_for("/uploads/a//b.jpg"), None);
    }

    #[test]
    fn decode_strips_a_data_url_prefix() {
        let plain = BlobStore::decode_image("aGVsbG8=").unwrap();
        let prefixed = BlobStore::decode_image("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(plain, b"hello");
        assert_eq!(prefixed, b"hello");
        assert!(BlobStore::decode_image("not base64!!!").is_err());
    }

    #[tokio::test]
    async fn product_images_get_distinct_keys() {
        let (_dir, store) = store();
        let first = store.put_product_image(b"one").await.unwrap();
        let second = store.put_product_image(b"two").await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("/uploads/product_images/"));
        assert!(first.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn deletes_only_what_it_stored() {
        let (_dir, store) = store();
        let url = store.put_product_image(b"gone soon").await.unwrap();
        let path = store.path_for(&key_for(&url).unwrap());
        assert!(path.exists());

        store.delete_by_url(&url).await.unwrap();
        assert!(!path.exists());
        assert!(store.delete_by_url("https://elsewhere/img.jpg").await.is_err());
    }

    #[tokio::test]
    async fn profile_photo_overwrites_in_place() {
        let (_dir, store) = store();
        let first = store.put_profile_photo("u1", b"old").await.unwrap();
        let second = store.put_profile_photo("u1", b"new").await.unwrap();
        assert_eq!(first, second);
        let stored = tokio::fs::read(store.path_for(&key_for(&second).unwrap()))
            .await
            .unwrap();
        assert_eq!(stored, b"new");
    }
}
