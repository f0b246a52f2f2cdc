//! Blob store contract with filesystem and in-memory backends.
//!
//! Objects are addressed as `<bucket>/<object>` and served publicly at
//! `<public_base_url>/<bucket>/<object>` once marked public-read.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_common::{Error, Result},
    tracing::debug,
};

use crate::mime::content_type_for_path;

/// A stored object as served to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()>;

    async fn set_public_read(&self, bucket: &str, object: &str) -> Result<()>;

    fn public_url(&self, bucket: &str, object: &str) -> String;

    /// Fetch an object only if it is public-read.
    async fn get_public_object(&self, bucket: &str, object: &str) -> Result<Option<StoredObject>>;
}

fn join_url(base: &str, bucket: &str, object: &str) -> String {
    format!("{}/{bucket}/{object}", base.trim_end_matches('/'))
}

fn check_bucket(bucket: &str) -> Result<()> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !bucket.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid bucket name: {bucket:?}")))
    }
}

fn check_object(object: &str) -> Result<()> {
    let path = Path::new(object);
    let valid = !object.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(part) if !part.to_string_lossy().starts_with('.')));
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid object name: {object:?}")))
    }
}

/// Stores objects under `<root>/<bucket>/<object>`. Public-read markers live
/// under `<root>/.public/<bucket>/<object>` and content types under
/// `<root>/.meta/<bucket>/<object>`.
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn marker_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.root.join(".public").join(bucket).join(object)
    }

    fn content_type_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.root.join(".meta").join(bucket).join(object)
    }

    /// Content type recorded at upload, or a guess from the extension for
    /// objects written without one.
    async fn content_type(&self, bucket: &str, object: &str) -> Result<String> {
        match tokio::fs::read_to_string(self.content_type_path(bucket, object)).await {
            Ok(stored) if !stored.trim().is_empty() => Ok(stored.trim().to_string()),
            Ok(_) => Ok(content_type_for_path(object).to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(content_type_for_path(object).to_string())
            },
            Err(e) => Err(Error::external(
                format!("reading content type of {bucket}/{object}"),
                e,
            )),
        }
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::external(format!("creating {}", parent.display()), e))?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        check_bucket(bucket)?;
        let dir = self.bucket_dir(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::external(format!("creating bucket {bucket}"), e))
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        check_bucket(bucket)?;
        check_object(object)?;
        let dir = self.bucket_dir(bucket);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::not_found("bucket", bucket));
        }
        let path = dir.join(object);
        create_parent(&path).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::external(format!("writing {bucket}/{object}"), e))?;
        let meta = self.content_type_path(bucket, object);
        create_parent(&meta).await?;
        tokio::fs::write(&meta, content_type).await.map_err(|e| {
            Error::external(format!("writing content type of {bucket}/{object}"), e)
        })?;
        debug!(bucket, object, content_type, size = bytes.len(), "stored blob");
        Ok(())
    }

    async fn set_public_read(&self, bucket: &str, object: &str) -> Result<()> {
        check_bucket(bucket)?;
        check_object(object)?;
        if !tokio::fs::try_exists(self.bucket_dir(bucket).join(object))
            .await
            .unwrap_or(false)
        {
            return Err(Error::not_found("object", format!("{bucket}/{object}")));
        }
        let marker = self.marker_path(bucket, object);
        create_parent(&marker).await?;
        tokio::fs::write(&marker, b"")
            .await
            .map_err(|e| Error::external(format!("marking {bucket}/{object} public"), e))
    }

    fn public_url(&self, bucket: &str, object: &str) -> String {
        join_url(&self.public_base_url, bucket, object)
    }

    async fn get_public_object(&self, bucket: &str, object: &str) -> Result<Option<StoredObject>> {
        check_bucket(bucket)?;
        check_object(object)?;
        if !tokio::fs::try_exists(self.marker_path(bucket, object))
            .await
            .unwrap_or(false)
        {
            return Ok(None);
        }
        match tokio::fs::read(self.bucket_dir(bucket).join(object)).await {
            Ok(bytes) => Ok(Some(StoredObject {
                bytes: Bytes::from(bytes),
                content_type: self.content_type(bucket, object).await?,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::external(format!("reading {bucket}/{object}"), e)),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Bytes,
    content_type: String,
    public: bool,
}

/// In-process blob store for tests and ephemeral runs.
pub struct MemoryBlobStore {
    public_base_url: String,
    buckets: Mutex<HashMap<String, HashMap<String, MemoryObject>>>,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn object_count(&self) -> usize {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.values().map(HashMap::len).sum()
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.contains_key(bucket)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        check_bucket(bucket)?;
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        check_object(object)?;
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::not_found("bucket", bucket))?;
        objects.insert(object.to_string(), MemoryObject {
            bytes,
            content_type: content_type.to_string(),
            public: false,
        });
        Ok(())
    }

    async fn set_public_read(&self, bucket: &str, object: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let stored = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(object))
            .ok_or_else(|| Error::not_found("object", format!("{bucket}/{object}")))?;
        stored.public = true;
        Ok(())
    }

    fn public_url(&self, bucket: &str, object: &str) -> String {
        join_url(&self.public_base_url, bucket, object)
    }

    async fn get_public_object(&self, bucket: &str, object: &str) -> Result<Option<StoredObject>> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(buckets
            .get(bucket)
            .and_then(|objects| objects.get(object))
            .filter(|stored| stored.public)
            .map(|stored| StoredObject {
                bytes: stored.bytes.clone(),
                content_type: stored.content_type.clone(),
            }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_objects_are_private_until_marked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost:8640/blobs/");

        store.ensure_bucket("parley-acme").await.unwrap();
        store.ensure_bucket("parley-acme").await.unwrap();
        store
            .put_object("parley-acme", "a_1_x.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();
        assert!(
            store
                .get_public_object("parley-acme", "a_1_x.pdf")
                .await
                .unwrap()
                .is_none()
        );

        store.set_public_read("parley-acme", "a_1_x.pdf").await.unwrap();
        let object = store
            .get_public_object("parley-acme", "a_1_x.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&object.bytes[..], b"%PDF");
        assert_eq!(object.content_type, "application/pdf");
        assert_eq!(
            store.public_url("parley-acme", "a_1_x.pdf"),
            "http://localhost:8640/blobs/parley-acme/a_1_x.pdf"
        );
    }

    #[tokio::test]
    async fn fs_serves_the_uploaded_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://x");
        store.ensure_bucket("bkt").await.unwrap();
        store
            .put_object("bkt", "photo_1_abc", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        store.set_public_read("bkt", "photo_1_abc").await.unwrap();

        let object = store
            .get_public_object("bkt", "photo_1_abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(&object.bytes[..], b"png");
    }

    #[tokio::test]
    async fn fs_put_requires_existing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://x");
        let err = store
            .put_object("missing", "o.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://x");
        store.ensure_bucket("b").await.unwrap();
        for object in ["../escape", "/abs", ".public/b/x", "a/../../b"] {
            let err = store
                .put_object("b", object, Bytes::from_static(b"x"), "text/plain")
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 400, "{object}");
        }
        assert!(store.ensure_bucket("../up").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_tracks_public_flag() {
        let store = MemoryBlobStore::new("http://blobs");
        store.ensure_bucket("b").await.unwrap();
        store
            .put_object("b", "o.jpg", Bytes::from_static(b"img"), "image/jpeg")
            .await
            .unwrap();
        assert!(store.get_public_object("b", "o.jpg").await.unwrap().is_none());
        store.set_public_read("b", "o.jpg").await.unwrap();
        let object = store.get_public_object("b", "o.jpg").await.unwrap().unwrap();
        assert_eq!(object.content_type, "image/jpeg");
        assert_eq!(store.object_count(), 1);
        assert!(store.set_public_read("b", "missing").await.is_err());
    }
}
