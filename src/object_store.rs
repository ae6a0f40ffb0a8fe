//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait covers every operation the pipeline needs from
//! the source and destination buckets, so the S3 backend ([`crate::s3`]) and
//! the in-memory backend ([`crate::memory_store`]) are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Errors raised by an object store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("{operation} failed (HTTP {status}): {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("local file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {operation} response: {detail}")]
    Malformed {
        operation: &'static str,
        detail: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One entry of a listing page.
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl ListedObject {
    /// Zero-byte keys ending in `/` are console-created folder markers.
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/') && self.size == 0
    }
}

/// A page of a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Opaque cursor for the next page; `None` when the listing is complete.
    pub next_continuation: Option<String>,
}

/// Result of a metadata probe on a single object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of at most `max_keys` objects.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: u32,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Probe an object; `Ok(None)` when it does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Stream an object's body into `path`, truncating any existing file.
    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path)
        -> Result<(), StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Mint a time-limited read URL for one object.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}
