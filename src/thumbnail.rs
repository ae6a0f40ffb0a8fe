//! Idempotent thumbnail creation for one source object.
//!
//! Workflow for a key:
//! 1. Ask the destination bucket whether a thumbnail already exists.
//! 2. Download the source object to a private temporary file.
//! 3. For images, read EXIF capture metadata.
//! 4. Images are decoded, shrunk to fit the configured box (aspect ratio
//!    preserved) and re-encoded as JPEG; video-like keys get the placeholder
//!    icon as PNG.
//! 5. Upload under the identical key in the destination bucket.
//!
//! Every failure becomes a [`ThumbnailOutcome`] value; nothing here returns
//! an error to the caller. The temporary file is a [`TempPath`], removed on
//! every exit path when it goes out of scope.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageReader};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::{ExistenceProbe, ThumbnailConfig};
use crate::metadata;
use crate::models::{CaptureMetadata, FailureStage, ThumbnailOutcome};
use crate::object_store::{ObjectStore, StoreError};

/// Icon uploaded in place of a thumbnail for non-image media.
pub const BUNDLED_PLACEHOLDER: &[u8] = include_bytes!("../assets/movie.png");

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const PNG_CONTENT_TYPE: &str = "image/png";

pub struct ThumbnailProcessor {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    config: ThumbnailConfig,
    placeholder: Vec<u8>,
}

impl ThumbnailProcessor {
    /// Create a processor, loading the placeholder override if configured.
    pub fn new(
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        config: ThumbnailConfig,
    ) -> Result<Self> {
        let placeholder = match config.placeholder_path {
            Some(ref path) => std::fs::read(path).with_context(|| {
                format!("Failed to read placeholder image: {}", path.display())
            })?,
            None => BUNDLED_PLACEHOLDER.to_vec(),
        };
        Ok(Self {
            source,
            destination,
            config,
            placeholder,
        })
    }

    /// Produce the thumbnail for `key` unless it already exists.
    pub async fn process(
        &self,
        source_bucket: &str,
        key: &str,
        destination_bucket: &str,
    ) -> ThumbnailOutcome {
        let fail = |stage: FailureStage, detail: String| {
            warn!(
                bucket = source_bucket,
                key,
                %stage,
                error = %detail,
                "Error creating thumbnail"
            );
            ThumbnailOutcome::failed(destination_bucket, key, stage, detail)
        };

        match self.thumbnail_exists(destination_bucket, key).await {
            Ok(true) => {
                info!(key, bucket = destination_bucket, "Thumbnail already exists");
                return ThumbnailOutcome::already_present(destination_bucket, key);
            }
            Ok(false) => {}
            Err(e) => return fail(FailureStage::Probe, e.to_string()),
        }

        let local = match self.allocate_temp(key) {
            Ok(path) => path,
            Err(e) => return fail(FailureStage::Download, e.to_string()),
        };
        if let Err(e) = self
            .source
            .download_to_file(source_bucket, key, &local)
            .await
        {
            return fail(FailureStage::Download, e.to_string());
        }

        let (body, content_type, capture) = if self.config.is_video(key) {
            debug!(key, "using placeholder for video");
            (
                self.placeholder.clone(),
                PNG_CONTENT_TYPE,
                CaptureMetadata::default(),
            )
        } else {
            let path = local.to_path_buf();
            let (max_w, max_h, quality) = (
                self.config.max_width,
                self.config.max_height,
                self.config.jpeg_quality,
            );
            let rendered = tokio::task::spawn_blocking(move || {
                let capture = metadata::extract(&path);
                render_thumbnail(&path, max_w, max_h, quality).map(|jpeg| (jpeg, capture))
            })
            .await;
            match rendered {
                Ok(Ok((jpeg, capture))) => (jpeg, JPEG_CONTENT_TYPE, capture),
                Ok(Err(e)) => return fail(FailureStage::Encode, format!("{:#}", e)),
                Err(e) => return fail(FailureStage::Encode, e.to_string()),
            }
        };

        if let Err(e) = self
            .destination
            .put_object(destination_bucket, key, body, Some(content_type))
            .await
        {
            return fail(FailureStage::Upload, e.to_string());
        }

        info!(key, bucket = destination_bucket, content_type, "Thumbnail created");
        ThumbnailOutcome::created(destination_bucket, key, capture)
    }

    async fn thumbnail_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.config.existence_probe {
            ExistenceProbe::Exact => Ok(self.destination.head_object(bucket, key).await?.is_some()),
            ExistenceProbe::Prefix => {
                let page = self.destination.list_page(bucket, Some(key), 1, None).await?;
                Ok(!page.objects.is_empty())
            }
        }
    }

    /// Reserve a private temporary path that keeps the key's extension.
    fn allocate_temp(&self, key: &str) -> std::io::Result<TempPath> {
        let suffix = Path::new(key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("thumb-mirror-").suffix(&suffix);
        let file = match self.config.work_dir {
            Some(ref dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }
}

/// Decode `path` and encode a JPEG fitting within `max_w` x `max_h`.
///
/// Images already inside the box are re-encoded at their own size.
pub fn render_thumbnail(path: &Path, max_w: u32, max_h: u32, quality: u8) -> Result<Vec<u8>> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()
        .context("Failed to detect image format")?
        .decode()
        .context("Failed to decode image")?;

    let (orig_w, orig_h) = img.dimensions();
    let thumb: DynamicImage = if orig_w <= max_w && orig_h <= max_h {
        img
    } else {
        img.thumbnail(max_w, max_h)
    };

    let rgb = thumb.to_rgb8();
    let mut output = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode_image(&rgb)
        .context("Failed to encode JPEG")?;
    Ok(output.into_inner())
}
