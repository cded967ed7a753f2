//! Blob storage for cover images.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::utils::error::AppError;

/// A stored image and the content type it was uploaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes` and returns the permanent URL.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError>;

    /// Looks a blob up by the last path segment of its URL.
    async fn fetch(&self, blob_id: &str) -> Result<Blob, AppError>;

    async fn delete(&self, url: &str) -> Result<(), AppError>;

    /// Whether `url` points into this storage. Foreign URLs are never deleted.
    fn owns(&self, url: &str) -> bool;
}

/// Keeps blobs in memory. URLs are `{base_url}/{uuid}`, which `GET /media/:id`
/// serves when the base URL points at this server.
#[derive(Debug, Clone)]
pub struct MemoryBlobStorage {
    base_url: String,
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
}

impl MemoryBlobStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, url: &str) -> bool {
        self.blob_id(url).is_some_and(|id| {
            self.blobs
                .lock()
                .map(|blobs| blobs.contains_key(id))
                .unwrap_or(false)
        })
    }

    fn blob_id<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(&self.base_url)?
            .strip_prefix('/')
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }

    fn locked(&self) -> Result<MutexGuard<'_, HashMap<String, Blob>>, AppError> {
        self.blobs
            .lock()
            .map_err(|_| AppError::InternalServerError("blob storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError> {
        if bytes.is_empty() {
            return Err(AppError::ValidationError("image is empty".to_string()));
        }
        if !content_type.starts_with("image/") {
            return Err(AppError::ValidationError(format!(
                "expected an image, got '{content_type}'"
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/{}", self.base_url, id);
        self.locked()?.insert(
            id,
            Blob {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(url)
    }

    async fn fetch(&self, blob_id: &str) -> Result<Blob, AppError> {
        self.locked()?
            .get(blob_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("image '{blob_id}'")))
    }

    async fn delete(&self, url: &str) -> Result<(), AppError> {
        let removed = match self.blob_id(url) {
            Some(id) => self.locked()?.remove(id),
            None => None,
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("blob '{url}'"))),
        }
    }

    fn owns(&self, url: &str) -> bool {
        self.blob_id(url).is_some()
    }
}
