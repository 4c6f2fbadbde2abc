//! Local mirror of the archive.
//!
//! Every remote file maps to one deterministic local path. A file whose path
//! already exists is never fetched again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt as _;
use sensor_archive_ingest_models::progress::ProgressCallback;
use sensor_archive_ingest_models::{Partition, SourceFile};
use sensor_archive_scraper::download::download_file;

use crate::IngestContext;

/// Returns the mirror path of a remote file:
/// `{mirror_dir}/{partition}/{url without scheme, '/' replaced by '_'}`.
#[must_use]
pub fn local_path(mirror_dir: &Path, partition: Partition, url: &str) -> PathBuf {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    mirror_dir
        .join(partition.to_string())
        .join(without_scheme.replace('/', "_"))
}

/// Outcome counts of mirroring one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    /// Files fetched in this run.
    pub downloaded: usize,
    /// Files already present locally.
    pub skipped: usize,
    /// Files whose fetch failed.
    pub failed: usize,
    /// Bytes written.
    pub bytes: u64,
}

impl MirrorReport {
    /// Adds another report's counts to this one.
    pub const fn merge(&mut self, other: &Self) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.bytes += other.bytes;
    }
}

enum Outcome {
    Downloaded(u64),
    Skipped,
    Failed,
    Cancelled,
}

/// Mirrors the given files of one partition.
///
/// Up to `download_concurrency` files are fetched at once. Failures are
/// logged and counted; the file stays absent and is retried on the next run.
pub async fn mirror_partition(
    ctx: &IngestContext,
    partition: Partition,
    files: &[SourceFile],
    progress: &Arc<dyn ProgressCallback>,
) -> MirrorReport {
    let mirror_dir = ctx.settings.mirror_dir();
    let total = files.len();

    let outcomes: Vec<Outcome> = futures::stream::iter(files.iter().enumerate())
        .map(|(i, file)| async move {
            if ctx.is_cancelled() {
                return Outcome::Cancelled;
            }
            let dest = local_path(mirror_dir, partition, &file.url);
            if dest.exists() {
                return Outcome::Skipped;
            }

            progress.set_message(format!("{partition}: file {}/{total}", i + 1));
            match download_file(&ctx.http, &file.url, &dest).await {
                Ok(bytes) => Outcome::Downloaded(bytes),
                Err(e) => {
                    log::warn!("Failed to download {}: {e}", file.url);
                    Outcome::Failed
                }
            }
        })
        .buffer_unordered(ctx.settings.download_concurrency.max(1))
        .collect()
        .await;

    let mut report = MirrorReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Downloaded(bytes) => {
                report.downloaded += 1;
                report.bytes += bytes;
            }
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.failed += 1,
            Outcome::Cancelled => {}
        }
    }

    log::info!(
        "{partition}: {} downloaded, {} already mirrored, {} failed",
        report.downloaded,
        report.skipped,
        report.failed
    );
    report
}
