//! Checkout/checkin record store backed by one object in the destination bucket.
//!
//! The store is a SQLite file. [`RecordStore::open`] checks it out: the
//! backing object is downloaded to a private local file (an empty object is
//! created first when none exists yet). Records are then read and written
//! locally, and [`RecordStore::close`] checks the file back in by uploading it
//! over the backing object and deleting the local copy.
//!
//! There is no locking between runs. If two runs overlap, the one that closes
//! last overwrites the other's writes.
//!
//! # Schema
//!
//! ```sql
//! records (
//!     id INTEGER PRIMARY KEY,
//!     source_path TEXT UNIQUE,     -- source object key
//!     thumbnail_path TEXT,
//!     uploaded_at INTEGER,         -- unix milliseconds
//!     captured_at INTEGER,         -- unix milliseconds, MIN_UTC when unknown
//!     description TEXT,
//!     tags_json TEXT,              -- JSON array of {"name": ..}
//!     gps_* ...
//! )
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::RecordStoreConfig;
use crate::error::{BootstrapError, FlushError, RecordError};
use crate::models::{Record, Tag};
use crate::object_store::ObjectStore;

const DATABASE_CONTENT_TYPE: &str = "application/x-sqlite3";

/// What [`RecordStore::upsert`] does when `source_path` is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertPolicy {
    /// Keep the stored record untouched.
    #[default]
    InsertOnly,
    /// Overwrite every column except `id`.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Unchanged,
    Replaced,
}

struct CheckedOut {
    pool: SqlitePool,
    local: TempPath,
}

pub struct RecordStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    work_dir: Option<PathBuf>,
    checked_out: Option<CheckedOut>,
}

impl RecordStore {
    /// A closed store for the backing object `config.key` in `bucket`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str, config: &RecordStoreConfig) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            key: config.key.clone(),
            work_dir: config.work_dir.clone(),
            checked_out: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.checked_out.is_some()
    }

    /// Local path of the checked-out database, if open.
    pub fn local_path(&self) -> Option<&Path> {
        self.checked_out.as_ref().map(|c| &*c.local)
    }

    /// Check out the backing database. Calling it again reuses the open copy.
    pub async fn open(&mut self) -> Result<(), BootstrapError> {
        self.pool().await.map(|_| ())
    }

    pub async fn exists(&mut self, source_path: &str) -> Result<bool, RecordError> {
        let pool = self.pool().await?;
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM records WHERE source_path = ?")
            .bind(source_path)
            .fetch_optional(pool)
            .await?;
        Ok(found.is_some())
    }

    /// Insert `record` unless its `source_path` is already stored.
    pub async fn insert(&mut self, record: &Record) -> Result<UpsertOutcome, RecordError> {
        self.upsert(record, UpsertPolicy::InsertOnly).await
    }

    pub async fn upsert(
        &mut self,
        record: &Record,
        policy: UpsertPolicy,
    ) -> Result<UpsertOutcome, RecordError> {
        let tags_json = serde_json::to_string(&record.tags)?;
        let pool = self.pool().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM records WHERE source_path = ?")
                .bind(&record.source_path)
                .fetch_optional(pool)
                .await?;

        match (existing, policy) {
            (Some(_), UpsertPolicy::InsertOnly) => {
                info!(source_path = %record.source_path, "Record already exists, leaving it unchanged");
                Ok(UpsertOutcome::Unchanged)
            }
            (Some(id), UpsertPolicy::Replace) => {
                sqlx::query(
                    r#"
                    UPDATE records SET
                        thumbnail_path = ?, uploaded_at = ?, captured_at = ?,
                        description = ?, tags_json = ?,
                        gps_latitude = ?, gps_longitude = ?, gps_altitude = ?,
                        gps_altitude_ref = ?, gps_latitude_ref = ?, gps_longitude_ref = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.thumbnail_path)
                .bind(record.uploaded_at.timestamp_millis())
                .bind(record.captured_at.timestamp_millis())
                .bind(&record.description)
                .bind(&tags_json)
                .bind(record.gps_latitude)
                .bind(record.gps_longitude)
                .bind(&record.gps_altitude)
                .bind(&record.gps_altitude_ref)
                .bind(&record.gps_latitude_ref)
                .bind(&record.gps_longitude_ref)
                .bind(id)
                .execute(pool)
                .await?;
                debug!(source_path = %record.source_path, id, "record replaced");
                Ok(UpsertOutcome::Replaced)
            }
            (None, _) => {
                sqlx::query(
                    r#"
                    INSERT INTO records (
                        source_path, thumbnail_path, uploaded_at, captured_at,
                        description, tags_json,
                        gps_latitude, gps_longitude, gps_altitude,
                        gps_altitude_ref, gps_latitude_ref, gps_longitude_ref
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.source_path)
                .bind(&record.thumbnail_path)
                .bind(record.uploaded_at.timestamp_millis())
                .bind(record.captured_at.timestamp_millis())
                .bind(&record.description)
                .bind(&tags_json)
                .bind(record.gps_latitude)
                .bind(record.gps_longitude)
                .bind(&record.gps_altitude)
                .bind(&record.gps_altitude_ref)
                .bind(&record.gps_latitude_ref)
                .bind(&record.gps_longitude_ref)
                .execute(pool)
                .await?;
                debug!(source_path = %record.source_path, "record inserted");
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    pub async fn get(&mut self, source_path: &str) -> Result<Option<Record>, RecordError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            SELECT id, source_path, thumbnail_path, uploaded_at, captured_at,
                   description, tags_json,
                   gps_latitude, gps_longitude, gps_altitude,
                   gps_altitude_ref, gps_latitude_ref, gps_longitude_ref
            FROM records WHERE source_path = ?
            "#,
        )
        .bind(source_path)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tags_json: String = row.get("tags_json");
        let tags: Vec<Tag> = serde_json::from_str(&tags_json)?;
        Ok(Some(Record {
            id: Some(row.get("id")),
            source_path: row.get("source_path"),
            thumbnail_path: row.get("thumbnail_path"),
            uploaded_at: from_unix_millis(row.get("uploaded_at")),
            captured_at: from_unix_millis(row.get("captured_at")),
            description: row.get("description"),
            tags,
            gps_latitude: row.get("gps_latitude"),
            gps_longitude: row.get("gps_longitude"),
            gps_altitude: row.get("gps_altitude"),
            gps_altitude_ref: row.get("gps_altitude_ref"),
            gps_latitude_ref: row.get("gps_latitude_ref"),
            gps_longitude_ref: row.get("gps_longitude_ref"),
        }))
    }

    pub async fn count(&mut self) -> Result<i64, RecordError> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Check the database back in: upload it over the backing object, then
    /// delete the local file.
    ///
    /// The local file is deleted even when the upload fails. Closing a store
    /// that was never opened, or closing twice, does nothing.
    pub async fn close(&mut self) -> Result<(), FlushError> {
        let Some(CheckedOut { pool, local }) = self.checked_out.take() else {
            return Ok(());
        };
        pool.close().await;

        let path = local.to_path_buf();
        let uploaded = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let size = bytes.len();
                let result = self
                    .store
                    .put_object(&self.bucket, &self.key, bytes, Some(DATABASE_CONTENT_TYPE))
                    .await;
                if result.is_ok() {
                    info!(bucket = %self.bucket, key = %self.key, size, "Record store uploaded");
                }
                result.map_err(|source| FlushError::Upload {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    source,
                })
            }
            Err(source) => Err(FlushError::ReadLocal {
                path: path.clone(),
                source,
            }),
        };

        let removed = local
            .close()
            .map_err(|source| FlushError::RemoveLocal { path, source });

        match (uploaded, removed) {
            (Err(upload), Err(remove)) => {
                warn!(error = %remove, "Failed to remove local record store after failed upload");
                Err(upload)
            }
            (uploaded, removed) => uploaded.and(removed),
        }
    }

    async fn pool(&mut self) -> Result<&SqlitePool, BootstrapError> {
        let checked_out = match self.checked_out.take() {
            Some(existing) => existing,
            None => self.check_out().await?,
        };
        Ok(&self.checked_out.insert(checked_out).pool)
    }

    async fn check_out(&self) -> Result<CheckedOut, BootstrapError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("thumb-mirror-records-").suffix(".db");
        let file = match self.work_dir {
            Some(ref dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(BootstrapError::LocalFile)?;
        let local = file.into_temp_path();

        let present = self
            .store
            .head_object(&self.bucket, &self.key)
            .await
            .map_err(|source| BootstrapError::ProbeBacking {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                source,
            })?
            .is_some();

        if !present {
            info!(bucket = %self.bucket, key = %self.key, "Creating empty record store");
            self.store
                .put_object(&self.bucket, &self.key, Vec::new(), Some(DATABASE_CONTENT_TYPE))
                .await
                .map_err(|source| BootstrapError::CreateBacking {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                    source,
                })?;
        }

        self.store
            .download_to_file(&self.bucket, &self.key, &local)
            .await
            .map_err(|source| BootstrapError::DownloadBacking {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                source,
            })?;

        let pool = connect(&local)
            .await
            .map_err(|source| BootstrapError::Open {
                path: local.to_path_buf(),
                source,
            })?;
        info!(bucket = %self.bucket, key = %self.key, path = %local.display(), "Record store checked out");
        Ok(CheckedOut { pool, local })
    }
}

async fn connect(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path TEXT NOT NULL UNIQUE,
            thumbnail_path TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            captured_at INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '[]',
            gps_latitude REAL,
            gps_longitude REAL,
            gps_altitude TEXT,
            gps_altitude_ref TEXT,
            gps_latitude_ref TEXT,
            gps_longitude_ref TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_captured_at ON records(captured_at)")
        .execute(pool)
        .await?;
    Ok(())
}

fn from_unix_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
