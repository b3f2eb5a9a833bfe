use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Object storage that hands back a durable public URL for uploaded bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String, BlobError>;
}

/// `products/<uuid>-<name>` with the name reduced to `[a-z0-9._-]`.
pub fn object_key(filename: &str) -> String {
    let sanitized: String = filename
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let name = if sanitized.is_empty() {
        "image"
    } else {
        sanitized
    };
    format!("products/{}-{}", Uuid::new_v4().simple(), name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub size: usize,
}

/// Keeps uploads in process memory. Used when no object storage is
/// configured and by tests.
pub struct MemoryBlobStore {
    bucket: String,
    reject_all: bool,
    objects: Mutex<Vec<StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            reject_all: false,
            objects: Mutex::new(Vec::new()),
        }
    }

    /// A store whose every upload fails, as an unavailable backend would.
    #[cfg(test)]
    pub fn rejecting(bucket: impl Into<String>) -> Self {
        Self {
            reject_all: true,
            ..Self::new(bucket)
        }
    }

    #[cfg(test)]
    pub async fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().await.clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        if self.reject_all {
            return Err(BlobError::Rejected(format!("bucket `{}` is read-only", self.bucket)));
        }
        let key = object_key(filename);
        let url = format!("memory://{}/{}", self.bucket, key);
        let object = StoredObject {
            key,
            content_type: content_type.to_string(),
            size: bytes.len(),
        };
        debug!(
            target = "ingest.blob",
            key = %object.key,
            content_type = %object.content_type,
            size = object.size,
            "memory_upload_ok"
        );
        self.objects.lock().await.push(object);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_sanitizes_names() {
        let key = object_key("Front View (1).JPG");
        assert!(key.starts_with("products/"));
        assert!(key.ends_with("-front-view--1-.jpg"));
        assert!(object_key("  ").ends_with("-image"));
    }

    #[tokio::test]
    async fn memory_store_records_uploads() {
        let store = MemoryBlobStore::new("product-images");
        let url = store
            .upload(vec![1, 2, 3], "front.png", "image/png")
            .await
            .expect("upload");
        assert!(url.starts_with("memory://product-images/products/"));
        let objects = store.objects().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].content_type, "image/png");
        assert_eq!(objects[0].size, 3);
    }

    #[tokio::test]
    async fn rejecting_store_fails_uploads() {
        let store = MemoryBlobStore::rejecting("product-images");
        let err = store
            .upload(vec![0], "a.jpg", "image/jpeg")
            .await
            .expect_err("should reject");
        assert!(matches!(err, BlobError::Rejected(_)));
        assert!(store.objects().await.is_empty());
    }
}
