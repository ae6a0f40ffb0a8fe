//! # Thumbnail mirror CLI (`thumb-mirror`)
//!
//! Batch job that mirrors recently changed media from a source bucket into
//! a thumbnail bucket and records capture metadata for each object.
//!
//! ## Usage
//!
//! ```bash
//! thumb-mirror --config ./config/thumb-mirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `thumb-mirror run` | Mirror objects changed in the last `lookback_hours` |
//! | `thumb-mirror run --since 2024-05-01` | Mirror objects changed after a date |
//! | `thumb-mirror check` | Verify both buckets (creating the destination if missing) |
//!
//! The process exits non-zero when a run ends `Aborted`. Ctrl-C requests
//! cancellation: the current item finishes, the record store is still
//! flushed, and the run reports `Aborted`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use thumb_mirror::config::{self, Config};
use thumb_mirror::logging;
use thumb_mirror::object_store::ObjectStore;
use thumb_mirror::pipeline;
use thumb_mirror::s3::S3Store;

/// Mirror recently changed media into a thumbnail bucket.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/thumb-mirror.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "thumb-mirror", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/thumb-mirror.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one mirror pass.
    Run {
        /// Only mirror objects modified after this instant
        /// (`YYYY-MM-DD` for midnight UTC, or RFC 3339).
        #[arg(long)]
        since: Option<String>,
    },

    /// Load the configuration and bootstrap the buckets without mirroring.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Err(e) = logging::init(&cfg.logging) {
        eprintln!("Warning: logging to file disabled: {}", e);
    }

    let (source, destination) = connect_stores(&cfg)?;

    match cli.command {
        Commands::Run { since } => {
            let cutoff = resolve_cutoff(since.as_deref(), cfg.listing.lookback_hours, Utc::now())?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling after the current item");
                    let _ = cancel_tx.send(true);
                }
            });

            let report = pipeline::run_pipeline(&cfg, source, destination, cutoff, cancel_rx).await;

            println!(
                "Run {}: {:?}: listed {}, created {}, already present {}, records inserted {}, failed {}",
                report.run_id,
                report.final_state,
                report.listed,
                report.thumbnails_created,
                report.already_present,
                report.records_inserted,
                report.failures.len()
            );
            for failure in &report.failures {
                let stage = failure
                    .stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "panic".to_string());
                println!("  failed [{}] {}: {}", stage, failure.key, failure.detail);
            }
            if let Some(ref e) = report.flush_error {
                println!("  record store flush failed: {}", e);
            }

            if report.is_aborted() {
                anyhow::bail!(
                    "run aborted: {}",
                    report.abort_reason.as_deref().unwrap_or("unknown reason")
                );
            }
        }
        Commands::Check => {
            pipeline::ensure_buckets(&cfg, source.as_ref(), destination.as_ref())
                .await
                .context("Bucket check failed")?;
            info!("Bucket check passed");
            println!(
                "Buckets ready: {} -> {}",
                cfg.source.bucket, cfg.destination.bucket
            );
        }
    }

    Ok(())
}

fn connect_stores(cfg: &Config) -> Result<(Arc<dyn ObjectStore>, Arc<dyn ObjectStore>)> {
    let source = S3Store::from_config(&cfg.source).context("Failed to configure source store")?;
    let destination =
        S3Store::from_config(&cfg.destination).context("Failed to configure destination store")?;
    Ok((Arc::new(source), Arc::new(destination)))
}

/// `--since` as an instant, or `now - lookback_hours` when absent.
fn resolve_cutoff(
    since: Option<&str>,
    lookback_hours: i64,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let Some(since) = since else {
        return Ok(now - chrono::Duration::hours(lookback_hours));
    };
    if let Ok(date) = NaiveDate::parse_from_str(since, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::default()).and_utc());
    }
    DateTime::parse_from_rfc3339(since)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid --since value '{}': expected YYYY-MM-DD or RFC 3339", since))
}
