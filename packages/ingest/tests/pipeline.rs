//! End-to-end runs of the index pass against an in-memory store and a
//! temporary mirror directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sensor_archive_database::duck::DuckDbStore;
use sensor_archive_database::memory::MemoryStore;
use sensor_archive_database::{CollectionKind, DbError, DocumentStore, GeoBounds};
use sensor_archive_ingest::{IngestContext, JobReport, Settings, run_job};
use sensor_archive_ingest_models::jobs::JobConfig;
use sensor_archive_ingest_models::progress::null_progress;
use sensor_archive_ingest_models::{Document, ImportMark, Partition};
use serde_json::json;
use tempfile::TempDir;

const DAY: &str = "2020-01-01";
const DATASET: &str = "ds";
const COLLECTION: &str = "ds_2020-01";
const FILE_INDEX: &str = "ds_file_index";

/// Wraps a store, counting bulk writes and optionally failing the mark of
/// one file.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_mark_for: Option<i64>,
    bulk_writes: AtomicUsize,
    cancel_on_purge: Mutex<Option<Arc<AtomicBool>>>,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>, fail_mark_for: Option<i64>) -> Self {
        Self {
            inner,
            fail_mark_for,
            bulk_writes: AtomicUsize::new(0),
            cancel_on_purge: Mutex::new(None),
        }
    }

    /// Raises `flag` as soon as the first file is cleaned before loading.
    fn cancel_on_purge(&self, flag: Arc<AtomicBool>) {
        *self.cancel_on_purge.lock().unwrap() = Some(flag);
    }
}

impl DocumentStore for FlakyStore {
    fn ping(&self) -> Result<(), DbError> {
        self.inner.ping()
    }
    fn list_collections(&self) -> Result<Vec<String>, DbError> {
        self.inner.list_collections()
    }
    fn collection_exists(&self, name: &str) -> Result<bool, DbError> {
        self.inner.collection_exists(name)
    }
    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), DbError> {
        self.inner.create_collection(name, kind)
    }
    fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        self.inner.drop_collection(name)
    }
    fn count(&self, name: &str) -> Result<u64, DbError> {
        self.inner.count(name)
    }
    fn bulk_insert(&self, name: &str, documents: &[Document]) -> Result<u64, DbError> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_insert(name, documents)
    }
    fn delete_by_file(
        &self,
        name: &str,
        file_date: Partition,
        file_id: i64,
    ) -> Result<u64, DbError> {
        if let Some(flag) = self.cancel_on_purge.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        self.inner.delete_by_file(name, file_date, file_id)
    }
    fn insert_mark(&self, name: &str, mark: &ImportMark) -> Result<(), DbError> {
        if self.fail_mark_for == Some(mark.file_id) {
            return Err(DbError::Conversion {
                message: "simulated crash".to_string(),
            });
        }
        self.inner.insert_mark(name, mark)
    }
    fn latest_mark(
        &self,
        name: &str,
        file_date: Partition,
    ) -> Result<Option<ImportMark>, DbError> {
        self.inner.latest_mark(name, file_date)
    }
    fn count_marks(&self, name: &str, file_date: Partition) -> Result<u64, DbError> {
        self.inner.count_marks(name, file_date)
    }
    fn located_documents_within(
        &self,
        name: &str,
        bounds: &GeoBounds,
    ) -> Result<Vec<Document>, DbError> {
        self.inner.located_documents_within(name, bounds)
    }
}

fn write_sensor_file(mirror: &Path, day: &str, sensor: &str, id: i64, rows: usize) {
    let dir = mirror.join(day);
    std::fs::create_dir_all(&dir).unwrap();
    let mut csv = String::from("sensor_id;sensor_type;location;lat;lon;timestamp;P1;P2\n");
    for row in 0..rows {
        csv.push_str(&format!(
            "{id};{sensor};{row};48.7;9.1;{day}T00:{:02}:00;{row}.5;1.0\n",
            row % 60
        ));
    }
    let name = format!("archive.example_{day}_{day}_{sensor}_sensor_{id}.csv");
    std::fs::write(dir.join(name), csv).unwrap();
}

fn context(store: Arc<dyn DocumentStore>, mirror: &TempDir) -> IngestContext {
    IngestContext::new(
        reqwest::Client::new(),
        store,
        Settings::new("http://archive.example/", mirror.path()),
    )
}

fn index_only(bucket_size: usize) -> JobConfig {
    JobConfig {
        download: false,
        bucket_size,
        ..JobConfig::new(DATASET)
    }
}

async fn run(ctx: &IngestContext, job: &JobConfig) -> JobReport {
    run_job(ctx, job, &null_progress()).await.unwrap()
}

fn marks_per_file(store: &MemoryStore) -> BTreeMap<i64, usize> {
    let mut counts = BTreeMap::new();
    for mark in store.marks(FILE_INDEX).unwrap() {
        *counts.entry(mark.file_id).or_insert(0) += 1;
    }
    counts
}

fn docs_per_file(store: &MemoryStore) -> BTreeMap<i64, usize> {
    let mut counts = BTreeMap::new();
    for doc in store.documents(COLLECTION).unwrap() {
        *counts.entry(doc["file_id"].as_i64().unwrap()).or_insert(0) += 1;
    }
    counts
}

#[tokio::test]
async fn imports_every_file_once() {
    let mirror = tempfile::tempdir().unwrap();
    for id in [3, 1, 2] {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 4);
    }
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);

    let report = run(&ctx, &index_only(100)).await;

    assert_eq!(report.index.files, 3);
    assert_eq!(report.index.marks, 3);
    assert_eq!(marks_per_file(&store), BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
    assert_eq!(docs_per_file(&store), BTreeMap::from([(1, 4), (2, 4), (3, 4)]));

    let mut seen = std::collections::BTreeSet::new();
    for doc in store.documents(COLLECTION).unwrap() {
        assert!(seen.insert((doc["file_id"].as_i64(), doc["location"].as_i64())));
    }
}

#[tokio::test]
async fn rerun_without_new_files_changes_nothing() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=3 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 4);
    }
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);
    let job = index_only(100);

    run(&ctx, &job).await;
    let docs = store.count(COLLECTION).unwrap();
    let marks = store.count(FILE_INDEX).unwrap();

    let report = run(&ctx, &job).await;
    assert_eq!(report.index.files, 0);
    assert_eq!(report.index.documents, 0);
    assert_eq!(store.count(COLLECTION).unwrap(), docs);
    assert_eq!(store.count(FILE_INDEX).unwrap(), marks);
}

#[tokio::test]
async fn new_files_after_the_marker_are_picked_up() {
    let mirror = tempfile::tempdir().unwrap();
    for id in [10, 20] {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 2);
    }
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);
    let job = index_only(100);
    run(&ctx, &job).await;

    write_sensor_file(mirror.path(), DAY, "sds011", 30, 2);
    let report = run(&ctx, &job).await;

    assert_eq!(report.index.files, 1);
    assert_eq!(
        marks_per_file(&store),
        BTreeMap::from([(10, 1), (20, 1), (30, 1)])
    );
}

#[tokio::test]
async fn resumes_after_interrupted_commit_without_duplicates() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=5 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 2);
    }
    let memory = Arc::new(MemoryStore::new());

    // Bucket of one file per flush; the mark of file 4 is lost after its
    // documents were written.
    let flaky = Arc::new(FlakyStore::new(memory.clone(), Some(4)));
    let report = run(&context(flaky, &mirror), &index_only(2)).await;
    assert_eq!(report.partitions_failed, 1);
    assert_eq!(marks_per_file(&memory), BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
    assert_eq!(docs_per_file(&memory).get(&4), Some(&2));
    assert_eq!(docs_per_file(&memory).get(&5), None);

    let report = run(&context(memory.clone(), &mirror), &index_only(2)).await;
    assert_eq!(report.index.files, 2);
    assert_eq!(report.index.purged, 2);
    assert_eq!(
        marks_per_file(&memory),
        BTreeMap::from([(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)])
    );
    assert_eq!(
        docs_per_file(&memory),
        BTreeMap::from([(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)])
    );
}

#[tokio::test]
async fn lost_mark_inside_a_bucket_reloads_from_that_file() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=5 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 2);
    }
    let memory = Arc::new(MemoryStore::new());

    // All five files share one bucket; its documents land, then the marks
    // stop at file 3.
    let flaky = Arc::new(FlakyStore::new(memory.clone(), Some(3)));
    let report = run(&context(flaky.clone(), &mirror), &index_only(100)).await;
    assert_eq!(report.partitions_failed, 1);
    assert_eq!(report.partitions_indexed, 0);
    assert_eq!(flaky.bulk_writes.load(Ordering::SeqCst), 1);
    assert_eq!(marks_per_file(&memory), BTreeMap::from([(1, 1), (2, 1)]));
    assert_eq!(
        docs_per_file(&memory),
        BTreeMap::from([(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)])
    );

    let report = run(&context(memory.clone(), &mirror), &index_only(100)).await;
    assert_eq!(report.partitions_indexed, 1);
    assert_eq!(report.index.files, 3);
    assert_eq!(report.index.purged, 6);
    assert_eq!(
        marks_per_file(&memory),
        BTreeMap::from([(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)])
    );
    assert_eq!(
        docs_per_file(&memory),
        BTreeMap::from([(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)])
    );
}

#[tokio::test]
async fn cleanup_leaves_other_files_untouched() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 7, 3);
    let store = Arc::new(MemoryStore::new());
    store
        .create_collection(COLLECTION, CollectionKind::Documents)
        .unwrap();

    // Leftovers of file 7 plus unrelated documents of the same month.
    let stale = |file_date: &str, file_id: i64| -> Document {
        json!({"file_date": file_date, "file_id": file_id, "stale": true})
            .as_object()
            .unwrap()
            .clone()
    };
    store
        .bulk_insert(
            COLLECTION,
            &[stale(DAY, 7), stale(DAY, 7), stale(DAY, 8), stale("2020-01-02", 7)],
        )
        .unwrap();

    let report = run(&context(store.clone(), &mirror), &index_only(100)).await;
    assert_eq!(report.index.purged, 2);

    let docs = store.documents(COLLECTION).unwrap();
    assert_eq!(docs.len(), 5);
    let stale_left: Vec<(String, i64)> = docs
        .iter()
        .filter(|d| d.contains_key("stale"))
        .map(|d| {
            (
                d["file_date"].as_str().unwrap().to_string(),
                d["file_id"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        stale_left,
        vec![(DAY.to_string(), 8), ("2020-01-02".to_string(), 7)]
    );
}

#[tokio::test]
async fn hundred_and_first_record_flushes_once_before_appending() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 1, 100);
    write_sensor_file(mirror.path(), DAY, "sds011", 2, 1);
    let memory = Arc::new(MemoryStore::new());
    let counting = Arc::new(FlakyStore::new(memory.clone(), None));

    let ctx = context(counting.clone(), &mirror);
    let report = run(&ctx, &index_only(100)).await;

    // One flush for the first 100, one trailing flush for the 101st.
    assert_eq!(counting.bulk_writes.load(Ordering::SeqCst), 2);
    assert_eq!(report.index.documents, 101);
}

#[tokio::test]
async fn sensor_allowlist_selects_exact_ids() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 219, 1);
    write_sensor_file(mirror.path(), DAY, "sds011", 431, 1);
    let store = Arc::new(MemoryStore::new());

    let job = JobConfig {
        sensor_ids: vec![219, 430],
        ..index_only(100)
    };
    run(&context(store.clone(), &mirror), &job).await;

    assert_eq!(marks_per_file(&store), BTreeMap::from([(219, 1)]));
}

#[tokio::test]
async fn substring_filter_selects_sensor_type() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 1, 1);
    write_sensor_file(mirror.path(), DAY, "dht22", 2, 1);
    let store = Arc::new(MemoryStore::new());

    let job = JobConfig {
        file_filters: vec!["dht22".to_string()],
        ..index_only(100)
    };
    run(&context(store.clone(), &mirror), &job).await;

    assert_eq!(marks_per_file(&store), BTreeMap::from([(2, 1)]));
}

#[tokio::test]
async fn cap_counts_already_imported_files() {
    let mirror = tempfile::tempdir().unwrap();
    for id in [5, 1, 4, 2, 3] {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 1);
    }
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);

    let capped = JobConfig {
        max_files_per_day: 2,
        ..index_only(100)
    };
    run(&ctx, &capped).await;
    assert_eq!(marks_per_file(&store), BTreeMap::from([(1, 1), (2, 1)]));

    let wider = JobConfig {
        max_files_per_day: 3,
        ..index_only(100)
    };
    run(&ctx, &wider).await;
    assert_eq!(
        marks_per_file(&store),
        BTreeMap::from([(1, 1), (2, 1), (3, 1)])
    );
}

#[tokio::test]
async fn stores_coordinates_as_lon_lat() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 1, 1);
    let store = Arc::new(MemoryStore::new());
    run(&context(store.clone(), &mirror), &index_only(100)).await;

    let doc = &store.documents(COLLECTION).unwrap()[0];
    assert_eq!(doc["geo_location"], json!([9.1, 48.7]));
    assert!(!doc.contains_key("lat"));
    assert!(!doc.contains_key("lon"));
    assert_eq!(doc["file_date"], json!(DAY));
    assert_eq!(doc["file_id"], json!(1));
}

#[tokio::test]
async fn truncate_reloads_from_scratch() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=2 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 3);
    }
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);
    run(&ctx, &index_only(100)).await;

    let truncating = JobConfig {
        truncate: true,
        ..index_only(100)
    };
    let report = run(&ctx, &truncating).await;

    assert_eq!(report.index.files, 2);
    assert_eq!(store.count(COLLECTION).unwrap(), 6);
    assert_eq!(marks_per_file(&store), BTreeMap::from([(1, 1), (2, 1)]));
}

#[tokio::test]
async fn partitions_land_in_monthly_collections() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), "2020-01-31", "sds011", 1, 1);
    write_sensor_file(mirror.path(), "2020-02-01", "sds011", 1, 2);
    let store = Arc::new(MemoryStore::new());
    let report = run(&context(store.clone(), &mirror), &index_only(100)).await;

    assert_eq!(report.partitions_indexed, 2);
    assert_eq!(store.count("ds_2020-01").unwrap(), 1);
    assert_eq!(store.count("ds_2020-02").unwrap(), 2);
    assert_eq!(store.count(FILE_INDEX).unwrap(), 2);
}

#[tokio::test]
async fn cancelled_run_writes_nothing() {
    let mirror = tempfile::tempdir().unwrap();
    write_sensor_file(mirror.path(), DAY, "sds011", 1, 1);
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), &mirror);
    ctx.cancel();

    let report = run(&ctx, &index_only(100)).await;
    assert!(report.cancelled);
    assert_eq!(report.index.files, 0);
    assert!(!store.collection_exists(COLLECTION).unwrap());
}

#[tokio::test]
async fn partition_cancelled_midway_is_not_counted_as_indexed() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=3 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 2);
    }
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(memory.clone(), None));
    let ctx = context(flaky.clone(), &mirror);
    flaky.cancel_on_purge(ctx.cancel_flag());

    let report = run(&ctx, &index_only(100)).await;
    assert!(report.cancelled);
    assert!(report.index.cancelled);
    assert_eq!(report.partitions_indexed, 0);
    assert_eq!(report.partitions_failed, 0);
    assert_eq!(report.index.files, 0);
    assert_eq!(flaky.bulk_writes.load(Ordering::SeqCst), 0);
    assert_eq!(memory.count(COLLECTION).unwrap(), 0);
    assert!(marks_per_file(&memory).is_empty());

    let report = run(&context(memory.clone(), &mirror), &index_only(100)).await;
    assert_eq!(report.partitions_indexed, 1);
    assert_eq!(report.index.files, 3);
}

#[tokio::test]
async fn loads_into_duckdb() {
    let mirror = tempfile::tempdir().unwrap();
    for id in 1..=3 {
        write_sensor_file(mirror.path(), DAY, "sds011", id, 5);
    }
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let ctx = context(store.clone(), &mirror);

    run(&ctx, &index_only(4)).await;
    assert_eq!(store.count(COLLECTION).unwrap(), 15);
    assert_eq!(store.count(FILE_INDEX).unwrap(), 3);

    let partition: Partition = DAY.parse().unwrap();
    assert_eq!(
        store
            .latest_mark(FILE_INDEX, partition)
            .unwrap()
            .map(|m| m.file_id),
        Some(3)
    );

    let report = run(&ctx, &index_only(4)).await;
    assert_eq!(report.index.files, 0);
    assert_eq!(store.count(COLLECTION).unwrap(), 15);
}
