//! Discovery of source objects changed since a cutoff.
//!
//! Walks every page of the source bucket, drops folder markers and anything
//! not strictly newer than the cutoff, and mints a short-lived read URL for
//! each survivor. A transport error anywhere fails the whole listing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::ListingError;
use crate::models::CandidateObject;
use crate::object_store::ObjectStore;

/// Validity window of every minted access URL.
pub const ACCESS_URL_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// List objects in `bucket` modified strictly after `cutoff`.
///
/// `page_size` is the `max-keys` of each listing request. The listing stops
/// between pages once `cancel` reads `true`.
pub async fn list_changed_since(
    store: &dyn ObjectStore,
    bucket: &str,
    cutoff: DateTime<Utc>,
    page_size: u32,
    cancel: &watch::Receiver<bool>,
) -> Result<Vec<CandidateObject>, ListingError> {
    let store_err = |source| ListingError::Store {
        bucket: bucket.to_string(),
        source,
    };

    let mut candidates = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if *cancel.borrow() {
            return Err(ListingError::Cancelled {
                bucket: bucket.to_string(),
            });
        }

        let page = store
            .list_page(bucket, None, page_size, continuation.as_deref())
            .await
            .map_err(store_err)?;
        pages += 1;

        for entry in page.objects {
            if entry.is_directory_marker() {
                continue;
            }
            if entry.last_modified <= cutoff {
                continue;
            }

            let expires_at = Utc::now()
                + chrono::Duration::from_std(ACCESS_URL_VALIDITY)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5));
            let url = store
                .presign_get(bucket, &entry.key, ACCESS_URL_VALIDITY)
                .await
                .map_err(store_err)?;

            candidates.push(CandidateObject {
                key: entry.key,
                last_modified_at: entry.last_modified,
                temporary_access_url: url,
                access_url_expires_at: expires_at,
            });
        }

        match page.next_continuation {
            Some(token) => {
                debug!(bucket, page = pages, "listing next page");
                continuation = Some(token);
            }
            None => break,
        }
    }

    info!(
        bucket,
        pages,
        candidates = candidates.len(),
        cutoff = %cutoff,
        "listing complete"
    );
    Ok(candidates)
}
