//! In-memory [`ObjectStore`] implementation for tests and local dry runs.
//!
//! Buckets are `BTreeMap`s behind `std::sync::RwLock`, so listings come back
//! in key order the way S3 returns them. The continuation cursor is the last
//! key of the previous page. Failures can be injected per operation to
//! exercise the pipeline's error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::object_store::{ListPage, ListedObject, ObjectMeta, ObjectStore, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    put_counts: RwLock<HashMap<(String, String), usize>>,
    list_calls: AtomicUsize,
    fail_listing: AtomicBool,
    fail_gets: AtomicBool,
    fail_all_puts: AtomicBool,
    failing_put_keys: RwLock<HashSet<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket if it does not exist yet.
    pub fn add_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .unwrap()
            .entry(bucket.to_string())
            .or_default();
    }

    /// Seed an object with an explicit modification time.
    ///
    /// Seeding does not count as a put.
    pub fn insert_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        last_modified: DateTime<Utc>,
    ) {
        self.buckets
            .write()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: None,
                    last_modified,
                },
            );
    }

    pub fn object_body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.body.clone())
    }

    pub fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .read()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .and_then(|obj| obj.content_type.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object_body(bucket, key).is_some()
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }

    /// Number of successful `put_object` calls for one key.
    pub fn put_count(&self, bucket: &str, key: &str) -> usize {
        self.put_counts
            .read()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all_puts(&self, fail: bool) {
        self.fail_all_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts_for(&self, key: &str) {
        self.failing_put_keys
            .write()
            .unwrap()
            .insert(key.to_string());
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        let buckets = self.buckets.read().unwrap();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::Unavailable(format!("no such bucket '{}'", bucket)))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: u32,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "listing disabled for '{}'",
                bucket
            )));
        }

        let buckets = self.buckets.read().unwrap();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::Unavailable(format!("no such bucket '{}'", bucket)))?;

        let prefix = prefix.unwrap_or("");
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |after| key.as_str() > after));

        let mut page = ListPage::default();
        for (key, obj) in matching.by_ref().take(max_keys.max(1) as usize) {
            page.objects.push(ListedObject {
                key: key.clone(),
                size: obj.body.len() as u64,
                last_modified: obj.last_modified,
            });
        }
        if matching.next().is_some() {
            page.next_continuation = page.objects.last().map(|obj| obj.key.clone());
        }
        Ok(page)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("reads disabled for '{}'", bucket)));
        }
        match self.lookup(bucket, key) {
            Ok(obj) => Ok(Some(ObjectMeta {
                size: obj.body.len() as u64,
                content_type: obj.content_type,
            })),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("reads disabled for '{}'", bucket)));
        }
        let obj = self.lookup(bucket, key)?;
        tokio::fs::write(path, &obj.body)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.fail_all_puts.load(Ordering::SeqCst)
            || self.failing_put_keys.read().unwrap().contains(key)
        {
            return Err(StoreError::Unavailable(format!(
                "writes disabled for s3://{}/{}",
                bucket, key
            )));
        }

        {
            let mut buckets = self.buckets.write().unwrap();
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::Unavailable(format!("no such bucket '{}'", bucket)))?;
            objects.insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.map(str::to_string),
                    last_modified: Utc::now(),
                },
            );
        }
        *self
            .put_counts
            .write()
            .unwrap()
            .entry((bucket.to_string(), key.to_string()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.read().unwrap().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.add_bucket(bucket);
        Ok(())
    }
}
