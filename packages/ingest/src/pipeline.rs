//! Job orchestration: the download pass and the index pass.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use sensor_archive_ingest_models::jobs::JobConfig;
use sensor_archive_ingest_models::progress::ProgressCallback;
use sensor_archive_ingest_models::{FileKey, Partition};

use crate::bucket::BatchLoader;
use crate::cleaner::purge_partial_import;
use crate::mirror::{MirrorReport, mirror_partition};
use crate::partition_index::PartitionIndexManager;
use crate::reader::{list_local_files, list_local_partitions, read_records};
use crate::selector::FileSelection;
use crate::tracker::{ProgressTracker, ResumeCursor};
use crate::{IngestContext, IngestError, crawler};

/// Steps of a job run, logged as the run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Job accepted; nothing done yet.
    Init,
    /// Listing the archive's partitions.
    DiscoverPartitions,
    /// Reading the resume point of a partition.
    LoadProgress(Partition),
    /// Choosing the files of a partition.
    SelectFiles(Partition),
    /// Removing leftovers of an interrupted import.
    Clean(FileKey),
    /// Reading a file into the bucket.
    Load(FileKey),
    /// Writing the trailing bucket of a partition.
    Flush(Partition),
    /// Partition finished.
    Done(Partition),
    /// Job finished.
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::DiscoverPartitions => f.write_str("DISCOVER_PARTITIONS"),
            Self::LoadProgress(p) => write!(f, "LOAD_PROGRESS {p}"),
            Self::SelectFiles(p) => write!(f, "SELECT_FILES {p}"),
            Self::Clean(key) => write!(f, "CLEAN {key}"),
            Self::Load(key) => write!(f, "LOAD {key}"),
            Self::Flush(p) => write!(f, "FLUSH {p}"),
            Self::Done(p) => write!(f, "DONE {p}"),
            Self::Complete => f.write_str("COMPLETE"),
        }
    }
}

fn enter(job: &str, phase: RunPhase) {
    log::debug!("[{job}] {phase}");
}

/// What the index pass did with one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// Files loaded in this run.
    pub files: usize,
    /// Files that could not be read and were skipped.
    pub unreadable: usize,
    /// Stale documents removed before reloading.
    pub purged: u64,
    /// Documents written.
    pub documents: u64,
    /// Marks written.
    pub marks: u64,
    /// Whether the walk stopped early on request.
    pub cancelled: bool,
}

/// Outcome of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Dataset name.
    pub job: String,
    /// Partitions found on the archive.
    pub partitions_discovered: usize,
    /// Download counts over all partitions.
    pub mirror: MirrorReport,
    /// Partitions the index pass walked to the end.
    pub partitions_indexed: usize,
    /// Partitions the index pass gave up on.
    pub partitions_failed: usize,
    /// Index counts over all partitions.
    pub index: PartitionReport,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
}

impl JobReport {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Self::default()
        }
    }
}

/// Runs one job: the download pass, then the index pass, as enabled.
///
/// # Errors
///
/// Returns [`IngestError`] if the document store is unreachable or the
/// file index cannot be prepared. Problems confined to one partition or
/// file are logged and counted in the report instead.
pub async fn run_job(
    ctx: &IngestContext,
    job: &JobConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<JobReport, IngestError> {
    let start = Instant::now();
    let mut report = JobReport::new(&job.name);

    enter(&job.name, RunPhase::Init);
    ctx.store.ping()?;
    log::info!("Running job {}", job.name);

    if job.download {
        download_phase(ctx, job, progress, &mut report).await;
    }

    if job.index && !ctx.is_cancelled() {
        index_phase(ctx, job, progress, &mut report)?;
    }

    report.cancelled = ctx.is_cancelled();
    enter(&job.name, RunPhase::Complete);
    log::info!(
        "Job {} finished in {:.1}s: {} files downloaded, {} files indexed, {} documents",
        job.name,
        start.elapsed().as_secs_f64(),
        report.mirror.downloaded,
        report.index.files,
        report.index.documents
    );
    Ok(report)
}

/// Mirrors the files a job selects from every discovered partition.
pub async fn download_phase(
    ctx: &IngestContext,
    job: &JobConfig,
    progress: &Arc<dyn ProgressCallback>,
    report: &mut JobReport,
) {
    enter(&job.name, RunPhase::DiscoverPartitions);
    let partitions = crawler::discover_partitions(ctx, job.last_days).await;
    report.partitions_discovered = partitions.len();

    let selection = FileSelection::from_job(job);
    progress.set_total(partitions.len() as u64);
    progress.set_message(format!("{}: downloading", job.name));

    for partition in partitions {
        if ctx.is_cancelled() {
            log::warn!("Download of {} cancelled", job.name);
            break;
        }

        let files = match crawler::partition_files(ctx, partition).await {
            Ok(files) => files,
            Err(e) => {
                log::error!("Skipping {partition}: {e}");
                progress.inc(1);
                continue;
            }
        };

        let selected = selection.select(files);
        log::info!("{partition}: {} files selected", selected.len());
        let mirrored = mirror_partition(ctx, partition, &selected, progress).await;
        report.mirror.merge(&mirrored);
        progress.inc(1);
    }
}

/// Loads the mirrored partitions of a job into the document store, newest
/// first.
///
/// # Errors
///
/// Returns [`IngestError`] if the file index cannot be prepared or the
/// mirror cannot be listed.
pub fn index_phase(
    ctx: &IngestContext,
    job: &JobConfig,
    progress: &Arc<dyn ProgressCallback>,
    report: &mut JobReport,
) -> Result<(), IngestError> {
    let store = ctx.store.as_ref();
    let mut manager = PartitionIndexManager::new(store, &job.name, job.truncate);
    manager.prepare_file_index()?;
    let tracker = ProgressTracker::new(store, &job.name);

    let mut partitions = list_local_partitions(ctx.settings.mirror_dir())?;
    if job.last_days > 0 {
        partitions.truncate(job.last_days);
    }

    progress.set_total(partitions.len() as u64);
    progress.set_position(0);
    progress.set_message(format!("{}: indexing", job.name));

    for partition in partitions {
        if ctx.is_cancelled() {
            break;
        }

        match index_partition(ctx, job, &mut manager, &tracker, partition) {
            Ok(partition_report) => {
                if !partition_report.cancelled {
                    report.partitions_indexed += 1;
                }
                report.index.cancelled |= partition_report.cancelled;
                report.index.files += partition_report.files;
                report.index.unreadable += partition_report.unreadable;
                report.index.purged += partition_report.purged;
                report.index.documents += partition_report.documents;
                report.index.marks += partition_report.marks;
            }
            Err(e) => {
                log::error!("Indexing of {partition} stopped: {e}");
                report.partitions_failed += 1;
            }
        }
        progress.inc(1);
    }
    Ok(())
}

/// Loads one partition, resuming after its last committed file.
///
/// Files are walked in ascending file-id order. Each admitted file is
/// cleaned, read and added to the bucket; marks are written as buckets
/// flush. A failed flush stops the partition so no later mark can move the
/// resume point past the failed files.
///
/// # Errors
///
/// Returns [`IngestError`] if the partition's collections cannot be
/// prepared, its resume point cannot be read, or a flush fails.
pub fn index_partition(
    ctx: &IngestContext,
    job: &JobConfig,
    manager: &mut PartitionIndexManager<'_>,
    tracker: &ProgressTracker<'_>,
    partition: Partition,
) -> Result<PartitionReport, IngestError> {
    let store = ctx.store.as_ref();
    let mut report = PartitionReport::default();

    enter(&job.name, RunPhase::LoadProgress(partition));
    let collection = manager.collection_for(partition)?;
    let resume = tracker.resume_point(partition)?;

    enter(&job.name, RunPhase::SelectFiles(partition));
    let selection = FileSelection::from_job(job);
    let files = selection.filter(list_local_files(ctx.settings.mirror_dir(), partition)?);

    let mut cursor = ResumeCursor::from_marker(resume.last_file_id);
    let mut committed = resume.committed_files;
    let cap = job.max_files_per_day as u64;
    let mut loader = BatchLoader::new(store, tracker, &collection, job.bucket_size);

    for file in files {
        if ctx.is_cancelled() {
            log::warn!("Indexing of {partition} cancelled");
            let stats = loader.abandon();
            report.documents = stats.documents;
            report.marks = stats.marks;
            // Files of the dropped bucket were not loaded after all.
            report.files = usize::try_from(stats.marks).unwrap_or(report.files);
            report.cancelled = true;
            return Ok(report);
        }
        if !cursor.admit(file.key.file_id) {
            continue;
        }
        if cap > 0 && committed >= cap {
            log::info!("{partition}: limit of {cap} files reached");
            break;
        }

        enter(&job.name, RunPhase::Clean(file.key));
        report.purged += purge_partial_import(store, &collection, file.key);

        enter(&job.name, RunPhase::Load(file.key));
        let records = match read_records(&file.path, file.key, ctx.settings.csv_delimiter) {
            Ok(records) => records,
            Err(e) => {
                log::error!("Skipping unreadable file {}: {e}", file.path.display());
                report.unreadable += 1;
                continue;
            }
        };
        log::debug!("{} rows queued from {}", records.len(), file.file_name);

        loader.add_file(file.key, records)?;
        committed += 1;
        report.files += 1;
    }

    enter(&job.name, RunPhase::Flush(partition));
    let stats = loader.finish()?;
    report.documents = stats.documents;
    report.marks = stats.marks;

    enter(&job.name, RunPhase::Done(partition));
    log::info!("Files for day {partition} have been indexed ({} new)", report.files);
    Ok(report)
}
