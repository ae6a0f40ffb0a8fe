//! Core data models used throughout the thumbnail mirror.
//!
//! These types represent the objects discovered in the source bucket, the
//! outcome of processing one of them, and the durable record kept for every
//! processed object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source-store entry newer than the configured cutoff.
///
/// Produced by the lister, consumed by exactly one processing attempt.
#[derive(Debug, Clone)]
pub struct CandidateObject {
    pub key: String,
    pub last_modified_at: DateTime<Utc>,
    /// Presigned GET URL valid until `access_url_expires_at`.
    pub temporary_access_url: String,
    pub access_url_expires_at: DateTime<Utc>,
}

/// Where in the thumbnail workflow a per-item failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Destination existence probe.
    Probe,
    /// Materializing the source object locally.
    Download,
    /// Decoding, resizing or encoding the image.
    Encode,
    /// Writing the thumbnail to the destination bucket.
    Upload,
    /// Persisting the record for a created thumbnail.
    Record,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::Probe => "probe",
            FailureStage::Download => "download",
            FailureStage::Encode => "encode",
            FailureStage::Upload => "upload",
            FailureStage::Record => "record",
        };
        f.write_str(name)
    }
}

/// Metadata recovered from embedded EXIF tags. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub capture_timestamp: Option<String>,
    pub altitude: Option<String>,
    pub altitude_ref: Option<String>,
    pub latitude: Option<String>,
    pub latitude_ref: Option<String>,
    pub longitude: Option<String>,
    pub longitude_ref: Option<String>,
    pub subject_location: Option<String>,
}

/// Result of processing one candidate object.
///
/// `succeeded == false` with no `error_detail` means the thumbnail already
/// existed; with an `error_detail` it is a real per-item failure.
#[derive(Debug, Clone)]
pub struct ThumbnailOutcome {
    pub succeeded: bool,
    pub destination_bucket: String,
    pub destination_key: String,
    pub error_detail: Option<String>,
    pub failure_stage: Option<FailureStage>,
    pub metadata: CaptureMetadata,
}

impl ThumbnailOutcome {
    pub fn created(bucket: &str, key: &str, metadata: CaptureMetadata) -> Self {
        Self {
            succeeded: true,
            destination_bucket: bucket.to_string(),
            destination_key: key.to_string(),
            error_detail: None,
            failure_stage: None,
            metadata,
        }
    }

    pub fn already_present(bucket: &str, key: &str) -> Self {
        Self {
            succeeded: false,
            destination_bucket: bucket.to_string(),
            destination_key: key.to_string(),
            error_detail: None,
            failure_stage: None,
            metadata: CaptureMetadata::default(),
        }
    }

    pub fn failed(bucket: &str, key: &str, stage: FailureStage, detail: String) -> Self {
        Self {
            succeeded: false,
            destination_bucket: bucket.to_string(),
            destination_key: key.to_string(),
            error_detail: Some(detail),
            failure_stage: Some(stage),
            metadata: CaptureMetadata::default(),
        }
    }

    /// True when processing short-circuited because the thumbnail exists.
    pub fn is_already_present(&self) -> bool {
        !self.succeeded && self.error_detail.is_none()
    }
}

/// A free-form label attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// Durable per-object entry kept in the record store.
///
/// `source_path` is unique within the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Assigned by the store; `None` until inserted.
    pub id: Option<i64>,
    pub source_path: String,
    pub thumbnail_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub description: String,
    pub tags: Vec<Tag>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<String>,
    pub gps_altitude_ref: Option<String>,
    pub gps_latitude_ref: Option<String>,
    pub gps_longitude_ref: Option<String>,
}

impl Record {
    /// A record with no captured metadata, keyed by `source_path`.
    pub fn new(source_path: &str, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            source_path: source_path.to_string(),
            thumbnail_path: source_path.to_string(),
            uploaded_at,
            captured_at: DateTime::<Utc>::MIN_UTC,
            description: String::new(),
            tags: Vec::new(),
            gps_latitude: None,
            gps_longitude: None,
            gps_altitude: None,
            gps_altitude_ref: None,
            gps_latitude_ref: None,
            gps_longitude_ref: None,
        }
    }
}
