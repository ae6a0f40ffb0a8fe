//! Orchestration of one mirror run.
//!
//! ```text
//! Idle ─▶ Listing ─▶ Processing(0..n) ─▶ Flushing ─▶ Done
//!            │              │                ▲
//!            └──────────────┴──▶ (abort) ────┘──▶ Aborted
//! ```
//!
//! Candidates are processed strictly one at a time. Each item runs inside its
//! own failure boundary (errors and panics alike), so one bad object never
//! costs the rest of the batch. Only bucket bootstrap, listing and record
//! store bootstrap failures abort a run. The record store is checked out
//! right after listing when there is anything to process. `Flushing` runs
//! exactly once on every path, including aborts and cancellation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{BootstrapError, FlushError, ListingError, RecordError};
use crate::lister;
use crate::models::{CandidateObject, CaptureMetadata, FailureStage, Record};
use crate::object_store::ObjectStore;
use crate::record_store::{RecordStore, UpsertOutcome};
use crate::thumbnail::ThumbnailProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Listing,
    /// Processing the candidate at this index.
    Processing(usize),
    Flushing,
    Done,
    Aborted,
}

/// One candidate that could not be mirrored.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub key: String,
    /// `None` when processing panicked.
    pub stage: Option<FailureStage>,
    pub detail: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub final_state: RunState,
    pub listed: usize,
    pub thumbnails_created: usize,
    pub already_present: usize,
    pub records_inserted: usize,
    pub records_unchanged: usize,
    pub failures: Vec<ItemFailure>,
    /// Why the run ended `Aborted`.
    pub abort_reason: Option<String>,
    pub flush_error: Option<FlushError>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            final_state: RunState::Idle,
            listed: 0,
            thumbnails_created: 0,
            already_present: 0,
            records_inserted: 0,
            records_unchanged: 0,
            failures: Vec::new(),
            abort_reason: None,
            flush_error: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.final_state == RunState::Aborted
    }
}

#[derive(Debug, thiserror::Error)]
enum Abort {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error("failed to prepare thumbnail processor: {0:#}")]
    Setup(anyhow::Error),
    #[error("run cancelled")]
    Cancelled,
}

/// Check the source bucket exists and create the destination if missing.
pub async fn ensure_buckets(
    config: &Config,
    source: &dyn ObjectStore,
    destination: &dyn ObjectStore,
) -> Result<(), BootstrapError> {
    let source_bucket = &config.source.bucket;
    let exists = source
        .bucket_exists(source_bucket)
        .await
        .map_err(|source| BootstrapError::BucketProbe {
            bucket: source_bucket.clone(),
            source,
        })?;
    if !exists {
        return Err(BootstrapError::SourceBucketMissing {
            bucket: source_bucket.clone(),
        });
    }

    let destination_bucket = &config.destination.bucket;
    let exists = destination
        .bucket_exists(destination_bucket)
        .await
        .map_err(|source| BootstrapError::BucketProbe {
            bucket: destination_bucket.clone(),
            source,
        })?;
    if !exists {
        info!(bucket = %destination_bucket, "Creating destination bucket");
        destination
            .create_bucket(destination_bucket)
            .await
            .map_err(|source| BootstrapError::CreateBucket {
                bucket: destination_bucket.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Mirror every source object modified after `cutoff`.
///
/// Never returns an error: aborts are reported through
/// [`RunReport::final_state`] and [`RunReport::abort_reason`].
pub async fn run_pipeline(
    config: &Config,
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    cutoff: DateTime<Utc>,
    cancel: watch::Receiver<bool>,
) -> RunReport {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);

    async move {
        let mut report = RunReport::new(run_id);
        let mut records = RecordStore::new(
            destination.clone(),
            &config.destination.bucket,
            &config.record_store,
        );

        info!(
            source = %config.source.bucket,
            destination = %config.destination.bucket,
            cutoff = %cutoff,
            "Starting mirror run"
        );

        let result = run_stages(
            config,
            source,
            destination,
            cutoff,
            &cancel,
            &mut records,
            &mut report,
        )
        .await;

        report.final_state = RunState::Flushing;
        if let Err(e) = records.close().await {
            error!(error = %e, "Failed to flush record store");
            report.flush_error = Some(e);
        }

        match result {
            Ok(()) => report.final_state = RunState::Done,
            Err(abort) => {
                error!(error = %abort, "Run aborted");
                report.final_state = RunState::Aborted;
                report.abort_reason = Some(abort.to_string());
            }
        }

        info!(
            state = ?report.final_state,
            listed = report.listed,
            created = report.thumbnails_created,
            already_present = report.already_present,
            inserted = report.records_inserted,
            failed = report.failures.len(),
            "Run finished"
        );
        report
    }
    .instrument(span)
    .await
}

async fn run_stages(
    config: &Config,
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    cutoff: DateTime<Utc>,
    cancel: &watch::Receiver<bool>,
    records: &mut RecordStore,
    report: &mut RunReport,
) -> Result<(), Abort> {
    if config.pipeline.ensure_buckets {
        ensure_buckets(config, source.as_ref(), destination.as_ref()).await?;
    }

    let processor = ThumbnailProcessor::new(source.clone(), destination, config.thumbnail.clone())
        .map_err(Abort::Setup)?;

    report.final_state = RunState::Listing;
    let candidates = lister::list_changed_since(
        source.as_ref(),
        &config.source.bucket,
        cutoff,
        config.listing.page_size,
        cancel,
    )
    .await?;
    report.listed = candidates.len();

    // Checked out before the first upload so a bootstrap failure leaves no
    // thumbnail without a record.
    if !candidates.is_empty() {
        records.open().await?;
    }

    for (index, candidate) in candidates.iter().enumerate() {
        if *cancel.borrow() {
            warn!(remaining = candidates.len() - index, "Cancellation requested");
            return Err(Abort::Cancelled);
        }
        report.final_state = RunState::Processing(index);

        let item = AssertUnwindSafe(process_item(config, &processor, records, candidate))
            .catch_unwind()
            .await;

        match item {
            Ok(ItemResult::AlreadyPresent) => report.already_present += 1,
            Ok(ItemResult::Failed(failure)) => report.failures.push(failure),
            Ok(ItemResult::Created(stored)) => {
                report.thumbnails_created += 1;
                match stored {
                    Ok(UpsertOutcome::Inserted | UpsertOutcome::Replaced) => {
                        report.records_inserted += 1
                    }
                    Ok(UpsertOutcome::Unchanged) => report.records_unchanged += 1,
                    Err(RecordError::Bootstrap(e)) => return Err(Abort::Bootstrap(e)),
                    Err(e) => {
                        warn!(key = %candidate.key, error = %e, "Failed to store record");
                        report.failures.push(ItemFailure {
                            key: candidate.key.clone(),
                            stage: Some(FailureStage::Record),
                            detail: e.to_string(),
                        });
                    }
                }
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(key = %candidate.key, panic = %detail, "Processing panicked");
                report.failures.push(ItemFailure {
                    key: candidate.key.clone(),
                    stage: None,
                    detail,
                });
            }
        }
    }
    Ok(())
}

enum ItemResult {
    AlreadyPresent,
    Failed(ItemFailure),
    Created(Result<UpsertOutcome, RecordError>),
}

async fn process_item(
    config: &Config,
    processor: &ThumbnailProcessor,
    records: &mut RecordStore,
    candidate: &CandidateObject,
) -> ItemResult {
    let outcome = processor
        .process(
            &config.source.bucket,
            &candidate.key,
            &config.destination.bucket,
        )
        .await;

    if outcome.is_already_present() {
        return ItemResult::AlreadyPresent;
    }
    if !outcome.succeeded {
        return ItemResult::Failed(ItemFailure {
            key: candidate.key.clone(),
            stage: outcome.failure_stage,
            detail: outcome.error_detail.unwrap_or_default(),
        });
    }

    let record = build_record(candidate, &outcome.metadata);
    ItemResult::Created(records.insert(&record).await)
}

/// The record stored for a freshly mirrored candidate.
pub fn build_record(candidate: &CandidateObject, metadata: &CaptureMetadata) -> Record {
    let mut record = Record::new(&candidate.key, candidate.last_modified_at);
    record.captured_at = parse_capture_time(metadata.capture_timestamp.as_deref());
    record.gps_latitude = parse_coordinate(&candidate.key, "latitude", metadata.latitude.as_deref());
    record.gps_longitude =
        parse_coordinate(&candidate.key, "longitude", metadata.longitude.as_deref());
    record.gps_altitude = metadata.altitude.clone();
    record.gps_altitude_ref = metadata.altitude_ref.clone();
    record.gps_latitude_ref = metadata.latitude_ref.clone();
    record.gps_longitude_ref = metadata.longitude_ref.clone();
    record
}

/// `YYYY-MM-DD HH:MM:SS` or RFC 3339; anything else is `MIN_UTC`.
pub fn parse_capture_time(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DateTime::<Utc>::MIN_UTC;
    };
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc();
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Empty or missing is `0.0`; unparseable is `None`.
fn parse_coordinate(key: &str, axis: &str, raw: Option<&str>) -> Option<f64> {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Some(0.0);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!(key, axis, value = raw, "Unparseable GPS coordinate");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
