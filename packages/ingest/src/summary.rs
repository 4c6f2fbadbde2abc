//! Status queries and console output shared by the CLI and the interactive
//! menu.

use sensor_archive_database::search::{GeoPage, dataset_collections};
use sensor_archive_database::store::file_index_name;
use sensor_archive_database::{DbError, DocumentStore};
use sensor_archive_ingest_models::Partition;
use sensor_archive_ingest_models::jobs::JobList;

use crate::JobReport;

/// Document count of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStatus {
    /// Collection name.
    pub name: String,
    /// Stored documents.
    pub documents: u64,
}

/// Import state of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    /// Dataset name.
    pub dataset: String,
    /// Monthly data collections.
    pub collections: Vec<CollectionStatus>,
    /// Total marks in the file index, if it exists.
    pub marks: Option<u64>,
    /// Marks per partition, for the given partitions that have any.
    pub partitions: Vec<(Partition, u64)>,
}

/// Collects the import state of `dataset`.
///
/// Mark counts are reported for the given `partitions` (usually those of
/// the local mirror).
///
/// # Errors
///
/// Returns [`DbError`] if the store cannot be queried.
pub fn dataset_status(
    store: &dyn DocumentStore,
    dataset: &str,
    partitions: &[Partition],
) -> Result<DatasetStatus, DbError> {
    let collections = dataset_collections(store, dataset)?
        .into_iter()
        .map(|name| {
            let documents = store.count(&name)?;
            Ok(CollectionStatus { name, documents })
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    let index = file_index_name(dataset);
    let (marks, partitions) = if store.collection_exists(&index)? {
        let mut per_partition = Vec::new();
        for &partition in partitions {
            let count = store.count_marks(&index, partition)?;
            if count > 0 {
                per_partition.push((partition, count));
            }
        }
        (Some(store.count(&index)?), per_partition)
    } else {
        (None, Vec::new())
    };

    Ok(DatasetStatus {
        dataset: dataset.to_string(),
        collections,
        marks,
        partitions,
    })
}

/// Prints a table of jobs.
pub fn print_jobs(list: &JobList) {
    println!(
        "{:<34} {:>8} {:>9} {:>8}  FILTER",
        "NAME", "MAX/DAY", "LAST DAYS", "TRUNCATE"
    );
    println!("{}", "-".repeat(80));
    for job in &list.jobs {
        let filter = if job.sensor_ids.is_empty() {
            job.file_filters.join(",")
        } else {
            format!("{} sensor ids", job.sensor_ids.len())
        };
        println!(
            "{:<34} {:>8} {:>9} {:>8}  {filter}",
            job.name, job.max_files_per_day, job.last_days, job.truncate
        );
    }
}

/// Prints the import state of a dataset.
pub fn print_status(status: &DatasetStatus) {
    println!("Dataset {}", status.dataset);
    match status.marks {
        Some(marks) => println!("  file index: {marks} imported files"),
        None => println!("  file index: missing"),
    }
    if status.collections.is_empty() {
        println!("  no data collections");
    }
    for collection in &status.collections {
        println!("  {:<40} {:>12} documents", collection.name, collection.documents);
    }
    for (partition, count) in &status.partitions {
        println!("  {partition}: {count} files imported");
    }
}

/// Prints one page of search results.
pub fn print_search(page: &GeoPage, current: usize) {
    println!(
        "{} results ({} pages), page {}",
        page.total,
        page.pages,
        current + 1
    );
    for hit in &page.hits {
        let document = serde_json::Value::Object(hit.document.clone());
        println!("{:>8.3} km  {}  {document}", hit.distance_km, hit.collection);
    }
}

/// Prints the outcome of a job run.
pub fn print_report(report: &JobReport) {
    println!("Job {}", report.job);
    println!(
        "  downloaded {} files ({} bytes), {} already mirrored, {} failed",
        report.mirror.downloaded, report.mirror.bytes, report.mirror.skipped, report.mirror.failed
    );
    println!(
        "  indexed {} files into {} documents over {} partitions ({} failed, {} unreadable files)",
        report.index.files,
        report.index.documents,
        report.partitions_indexed,
        report.partitions_failed,
        report.index.unreadable
    );
    if report.cancelled {
        println!("  cancelled before completion");
    }
}
