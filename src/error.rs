//! Run-level error taxonomy.
//!
//! Only listing and bootstrap failures abort a run. Per-item failures are
//! carried as values in [`crate::models::ThumbnailOutcome`], and a flush
//! failure is reported in the run report without aborting anything.

use std::path::PathBuf;

use crate::object_store::StoreError;

/// The source listing could not be completed; no partial result is returned.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("listing failed for bucket {bucket}: {source}")]
    Store {
        bucket: String,
        #[source]
        source: StoreError,
    },
    #[error("listing failed for bucket {bucket}: cancelled")]
    Cancelled { bucket: String },
}

/// A bucket or the record store could not be made ready.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("source bucket {bucket} does not exist")]
    SourceBucketMissing { bucket: String },
    #[error("failed to check bucket {bucket}: {source}")]
    BucketProbe {
        bucket: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to create bucket {bucket}: {source}")]
    CreateBucket {
        bucket: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to check record store s3://{bucket}/{key}: {source}")]
    ProbeBacking {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to create record store s3://{bucket}/{key}: {source}")]
    CreateBacking {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to download record store s3://{bucket}/{key}: {source}")]
    DownloadBacking {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to allocate local record store file: {0}")]
    LocalFile(#[source] std::io::Error),
    #[error("failed to open record store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// The checked-out record store could not be written back.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to read record store file {path}: {source}")]
    ReadLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to upload record store to s3://{bucket}/{key}: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to remove local record store file {path}: {source}")]
    RemoveLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A record store read or write failed.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("record store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("failed to encode record tags: {0}")]
    Tags(#[from] serde_json::Error),
}
