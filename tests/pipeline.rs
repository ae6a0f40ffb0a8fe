//! End-to-end runs of the mirror pipeline against the in-memory store.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use image::{DynamicImage, ImageFormat, RgbImage};
use tempfile::TempDir;
use tokio::sync::watch;

use thumb_mirror::config::{parse_config, Config};
use thumb_mirror::memory_store::InMemoryObjectStore;
use thumb_mirror::models::FailureStage;
use thumb_mirror::object_store::{ListPage, ObjectMeta, ObjectStore, StoreError};
use thumb_mirror::pipeline::{run_pipeline, RunState};
use thumb_mirror::record_store::RecordStore;

const SOURCE: &str = "photos";
const DEST: &str = "photos-thumbnails";
const DB_KEY: &str = "Database/photos.db";

struct Harness {
    source: Arc<InMemoryObjectStore>,
    destination: Arc<InMemoryObjectStore>,
    config: Config,
    work: TempDir,
}

impl Harness {
    fn new() -> Self {
        let work = TempDir::new().unwrap();
        let toml = format!(
            r#"
[source]
bucket = "{SOURCE}"

[destination]
bucket = "{DEST}"

[listing]
page_size = 2

[thumbnail]
work_dir = "{dir}"

[record_store]
work_dir = "{dir}"
"#,
            dir = work.path().display()
        );
        let config = parse_config(&toml).unwrap();

        let source = Arc::new(InMemoryObjectStore::new());
        source.add_bucket(SOURCE);
        Self {
            source,
            destination: Arc::new(InMemoryObjectStore::new()),
            config,
            work,
        }
    }

    fn seed(&self, key: &str, body: Vec<u8>, modified: DateTime<Utc>) {
        self.source.insert_object(SOURCE, key, body, modified);
    }

    async fn run(&self, cutoff: DateTime<Utc>) -> thumb_mirror::pipeline::RunReport {
        let (_tx, rx) = watch::channel(false);
        run_pipeline(
            &self.config,
            self.source.clone(),
            self.destination.clone(),
            cutoff,
            rx,
        )
        .await
    }

    fn record_store(&self) -> RecordStore {
        RecordStore::new(self.destination.clone(), DEST, &self.config.record_store)
    }

    fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work.path()).unwrap().next().is_none()
    }
}

/// Source store that panics while downloading one particular key.
struct PanicOnDownload {
    inner: Arc<InMemoryObjectStore>,
    key: &'static str,
}

#[async_trait]
impl ObjectStore for PanicOnDownload {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: u32,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.inner
            .list_page(bucket, prefix, max_keys, continuation)
            .await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        self.inner.head_object(bucket, key).await
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        if key == self.key {
            panic!("decoder blew up on {key}");
        }
        self.inner.download_to_file(bucket, key, path).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.put_object(bucket, key, body, content_type).await
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: std::time::Duration,
    ) -> Result<String, StoreError> {
        self.inner.presign_get(bucket, key, expires_in).await
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        self.inner.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.inner.create_bucket(bucket).await
    }
}

fn png(w: u32, h: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(w, h, image::Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn after(minutes: i64) -> DateTime<Utc> {
    cutoff() + Duration::minutes(minutes)
}

#[tokio::test]
async fn test_full_run_mirrors_and_records() {
    let h = Harness::new();
    h.seed("2024/a.png", png(300, 200), after(1));
    h.seed("2024/b.png", png(50, 80), after(2));
    h.seed("2024/clip.mp4", vec![0; 32], after(3));
    h.seed("2024/", Vec::new(), after(4));
    h.seed("2023/old.png", png(10, 10), cutoff());

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.listed, 3);
    assert_eq!(report.thumbnails_created, 3);
    assert_eq!(report.records_inserted, 3);
    assert!(report.failures.is_empty());
    assert!(report.flush_error.is_none());

    assert!(h.destination.contains(DEST, "2024/a.png"));
    assert!(h.destination.contains(DEST, "2024/clip.mp4"));
    assert!(!h.destination.contains(DEST, "2023/old.png"));
    assert!(h.destination.contains(DEST, DB_KEY));
    assert!(h.work_dir_is_empty());

    let mut records = h.record_store();
    assert_eq!(records.count().await.unwrap(), 3);
    let a = records.get("2024/a.png").await.unwrap().unwrap();
    assert_eq!(a.thumbnail_path, "2024/a.png");
    assert_eq!(a.uploaded_at, after(1));
    assert_eq!(a.captured_at, DateTime::<Utc>::MIN_UTC);
    records.close().await.unwrap();
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::new();
    h.seed("a.png", png(120, 120), after(1));
    h.seed("b.png", png(120, 120), after(2));

    let first = h.run(cutoff()).await;
    assert_eq!(first.thumbnails_created, 2);

    let second = h.run(cutoff()).await;
    assert_eq!(second.final_state, RunState::Done);
    assert_eq!(second.thumbnails_created, 0);
    assert_eq!(second.already_present, 2);
    assert_eq!(h.destination.put_count(DEST, "a.png"), 1);
    assert_eq!(h.destination.put_count(DEST, "b.png"), 1);

    let mut records = h.record_store();
    assert_eq!(records.count().await.unwrap(), 2);
    records.close().await.unwrap();
}

#[tokio::test]
async fn test_bad_item_does_not_stop_the_batch() {
    let h = Harness::new();
    h.seed("a.png", png(64, 64), after(1));
    h.seed("broken.jpg", b"garbage".to_vec(), after(2));
    h.seed("c.png", png(64, 64), after(3));
    h.destination.add_bucket(DEST);
    h.destination.fail_puts_for("c.png");

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.thumbnails_created, 1);
    assert_eq!(report.failures.len(), 2);
    let stages: Vec<_> = report.failures.iter().map(|f| f.stage).collect();
    assert!(stages.contains(&Some(FailureStage::Encode)));
    assert!(stages.contains(&Some(FailureStage::Upload)));
    assert!(h.work_dir_is_empty());

    let mut records = h.record_store();
    assert!(records.exists("a.png").await.unwrap());
    assert!(!records.exists("broken.jpg").await.unwrap());
    records.close().await.unwrap();
}

#[tokio::test]
async fn test_panicking_item_does_not_stop_the_batch() {
    let h = Harness::new();
    h.seed("a.png", png(64, 64), after(1));
    h.seed("b.png", png(64, 64), after(2));
    h.seed("c.png", png(64, 64), after(3));
    let source = Arc::new(PanicOnDownload {
        inner: h.source.clone(),
        key: "b.png",
    });
    let (_tx, rx) = watch::channel(false);

    let report = run_pipeline(&h.config, source, h.destination.clone(), cutoff(), rx).await;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.listed, 3);
    assert_eq!(report.thumbnails_created, 2);
    assert_eq!(report.records_inserted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, "b.png");
    assert_eq!(report.failures[0].stage, None);
    assert!(report.failures[0].detail.contains("decoder blew up"));
    assert!(report.flush_error.is_none());

    assert!(h.destination.contains(DEST, "a.png"));
    assert!(!h.destination.contains(DEST, "b.png"));
    assert!(h.destination.contains(DEST, "c.png"));
    assert!(h.destination.contains(DEST, DB_KEY));

    let mut records = h.record_store();
    assert_eq!(records.count().await.unwrap(), 2);
    assert!(records.exists("c.png").await.unwrap());
    assert!(!records.exists("b.png").await.unwrap());
    records.close().await.unwrap();
}

#[tokio::test]
async fn test_listing_failure_aborts_before_processing() {
    let h = Harness::new();
    h.seed("a.png", png(10, 10), after(1));
    h.source.fail_listing(true);

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Aborted);
    assert!(report
        .abort_reason
        .as_deref()
        .unwrap()
        .contains("listing failed for bucket photos"));
    assert_eq!(report.listed, 0);
    assert!(!h.destination.contains(DEST, "a.png"));
    assert!(!h.destination.contains(DEST, DB_KEY));
}

#[tokio::test]
async fn test_missing_source_bucket_aborts() {
    let h = Harness::new();
    let mut config = h.config.clone();
    config.source.bucket = "nope".to_string();
    let (_tx, rx) = watch::channel(false);

    let report = run_pipeline(
        &config,
        h.source.clone(),
        h.destination.clone(),
        cutoff(),
        rx,
    )
    .await;

    assert!(report.is_aborted());
    assert_eq!(h.source.list_calls(), 0);
}

#[tokio::test]
async fn test_destination_bucket_is_created() {
    let h = Harness::new();
    h.seed("a.png", png(10, 10), after(1));

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(h.destination.object_count(DEST), 2);
}

#[tokio::test]
async fn test_record_store_bootstrap_failure_aborts_run() {
    let h = Harness::new();
    h.seed("a.png", png(10, 10), after(1));
    h.seed("b.png", png(10, 10), after(2));
    h.destination.add_bucket(DEST);
    h.destination.fail_puts_for(DB_KEY);

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Aborted);
    assert_eq!(report.listed, 2);
    assert_eq!(report.thumbnails_created, 0);
    assert!(!h.destination.contains(DEST, "a.png"));
    assert!(!h.destination.contains(DEST, "b.png"));
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_flush_failure_is_reported_not_fatal() {
    let h = Harness::new();
    h.seed("a.png", png(10, 10), after(1));
    h.destination.add_bucket(DEST);
    // Existing backing object, so only the final flush writes it.
    h.destination
        .insert_object(DEST, DB_KEY, Vec::new(), after(0));
    h.destination.fail_puts_for(DB_KEY);

    let report = h.run(cutoff()).await;

    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(report.thumbnails_created, 1);
    assert!(report.flush_error.is_some());
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_cancellation_still_flushes() {
    let h = Harness::new();
    h.seed("a.png", png(10, 10), after(1));
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = run_pipeline(
        &h.config,
        h.source.clone(),
        h.destination.clone(),
        cutoff(),
        rx,
    )
    .await;

    assert_eq!(report.final_state, RunState::Aborted);
    assert!(report.flush_error.is_none());
    assert_eq!(report.thumbnails_created, 0);
    assert!(h.work_dir_is_empty());
}
