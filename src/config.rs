use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: BucketConfig,
    pub destination: BucketConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub record_store: RecordStoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint (MinIO, LocalStack); addressed path-style.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Cutoff used when no `--since` is given: now minus this many hours.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

fn default_page_size() -> u32 {
    1000
}
fn default_lookback_hours() -> i64 {
    24
}

/// How the destination bucket is asked whether a thumbnail already exists.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExistenceProbe {
    /// `HeadObject` on the exact key.
    #[default]
    Exact,
    /// List with the key as prefix and `max-keys=1`. Also matches any key
    /// that merely starts with the source key.
    Prefix,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_dimension")]
    pub max_width: u32,
    #[serde(default = "default_thumb_dimension")]
    pub max_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    /// Overrides the bundled placeholder icon for non-image media.
    #[serde(default)]
    pub placeholder_path: Option<PathBuf>,
    #[serde(default)]
    pub existence_probe: ExistenceProbe,
    /// Directory for per-object temporary downloads (system temp if unset).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumb_dimension(),
            max_height: default_thumb_dimension(),
            jpeg_quality: default_jpeg_quality(),
            video_extensions: default_video_extensions(),
            placeholder_path: None,
            existence_probe: ExistenceProbe::default(),
            work_dir: None,
        }
    }
}

fn default_thumb_dimension() -> u32 {
    100
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_video_extensions() -> Vec<String> {
    ["mp4", "mov", "m4v", "avi", "mkv", "webm", "3gp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordStoreConfig {
    /// Well-known key of the backing database in the destination bucket.
    #[serde(default = "default_record_store_key")]
    pub key: String,
    /// Directory for the checked-out database file (system temp if unset).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            key: default_record_store_key(),
            work_dir: None,
        }
    }
}

fn default_record_store_key() -> String {
    "Database/photos.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Check the source bucket exists and create the destination if missing.
    #[serde(default = "default_true")]
    pub ensure_buckets: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ensure_buckets: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files (system temp if unset).
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_retained_files")]
    pub retained_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: default_file_prefix(),
            retained_files: default_retained_files(),
        }
    }
}

fn default_file_prefix() -> String {
    "thumb-mirror".to_string()
}
fn default_retained_files() -> usize {
    3
}

impl ThumbnailConfig {
    /// True when `key` has one of the configured video extensions.
    pub fn is_video(&self, key: &str) -> bool {
        match Path::new(key).extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .video_extensions
                .iter()
                .any(|v| v.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    // Validate buckets
    if config.source.bucket.trim().is_empty() {
        anyhow::bail!("source.bucket must not be empty");
    }
    if config.destination.bucket.trim().is_empty() {
        anyhow::bail!("destination.bucket must not be empty");
    }

    // Validate listing
    if !(1..=1000).contains(&config.listing.page_size) {
        anyhow::bail!("listing.page_size must be in [1, 1000]");
    }
    if config.listing.lookback_hours < 0 {
        anyhow::bail!("listing.lookback_hours must be >= 0");
    }

    // Validate thumbnail
    if config.thumbnail.max_width == 0 || config.thumbnail.max_height == 0 {
        anyhow::bail!("thumbnail.max_width and thumbnail.max_height must be > 0");
    }
    if !(1..=100).contains(&config.thumbnail.jpeg_quality) {
        anyhow::bail!("thumbnail.jpeg_quality must be in [1, 100]");
    }
    if let Some(ref placeholder) = config.thumbnail.placeholder_path {
        if !placeholder.is_file() {
            anyhow::bail!(
                "thumbnail.placeholder_path does not exist: {}",
                placeholder.display()
            );
        }
    }

    // Validate record store
    if config.record_store.key.trim().is_empty() {
        anyhow::bail!("record_store.key must not be empty");
    }

    Ok(())
}
