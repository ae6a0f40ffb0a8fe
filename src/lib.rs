//! # Thumbnail Mirror
//!
//! A batch job that keeps a thumbnail bucket in step with a media bucket.
//!
//! Each run lists source objects modified after a cutoff and writes one
//! thumbnail per object under the identical key in the destination bucket.
//! Images are downscaled to JPEG and videos get a placeholder icon. Capture
//! metadata read from EXIF is recorded in a SQLite database that lives as
//! a single object in the destination bucket. The database is checked out at
//! the start of a run and checked back in at the end.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Lister  │──▶│   Pipeline   │──▶│ ThumbnailProcessor │──▶ destination bucket
//! │ (source) │   │ (sequential) │   │ + MetadataExtractor│
//! └──────────┘   └──────┬───────┘   └────────────────────┘
//!                       │
//!                       ▼
//!                ┌─────────────┐  checkout / checkin
//!                │ RecordStore │◀──────────────────▶ Database/photos.db
//!                │  (SQLite)   │
//!                └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`object_store`] | Object store trait and errors |
//! | [`s3`] | Amazon S3 backend (SigV4) |
//! | [`memory_store`] | In-memory backend for tests |
//! | [`lister`] | Changed-object discovery |
//! | [`metadata`] | EXIF capture metadata |
//! | [`thumbnail`] | Thumbnail creation |
//! | [`record_store`] | Checkout/checkin record database |
//! | [`pipeline`] | Run orchestration |
//! | [`error`] | Run-level error types |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod error;
pub mod lister;
pub mod logging;
pub mod memory_store;
pub mod metadata;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod record_store;
pub mod s3;
pub mod thumbnail;
