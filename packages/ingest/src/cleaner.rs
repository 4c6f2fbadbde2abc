//! Removal of half-imported files.
//!
//! A run can die after a bucket's documents are written but before their
//! marks are. Deleting a file's documents right before importing it again
//! keeps the collection free of duplicates.

use sensor_archive_database::DocumentStore;
use sensor_archive_ingest_models::FileKey;

/// Deletes every document of `collection` tagged with `key`.
///
/// Returns the number of documents removed. Failures are logged and count
/// as zero; the import carries on.
pub fn purge_partial_import(store: &dyn DocumentStore, collection: &str, key: FileKey) -> u64 {
    match store.delete_by_file(collection, key.partition, key.file_id) {
        Ok(0) => 0,
        Ok(deleted) => {
            log::info!("Deleted {deleted} partially imported documents of {key}");
            deleted
        }
        Err(e) => {
            log::error!("Failed to clean up {key} in {collection}: {e}");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use sensor_archive_database::CollectionKind;
    use sensor_archive_database::memory::MemoryStore;
    use sensor_archive_ingest_models::Document;
    use serde_json::json;

    use super::*;

    fn doc(file_date: &str, file_id: i64) -> Document {
        json!({"file_date": file_date, "file_id": file_id})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn deletes_exactly_the_tagged_documents() {
        let store = MemoryStore::new();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();
        store
            .bulk_insert(
                "ds_2020-01",
                &[
                    doc("2020-01-01", 2),
                    doc("2020-01-01", 2),
                    doc("2020-01-01", 3),
                    doc("2020-01-02", 2),
                ],
            )
            .unwrap();

        let key = FileKey {
            partition: "2020-01-01".parse().unwrap(),
            file_id: 2,
        };
        assert_eq!(purge_partial_import(&store, "ds_2020-01", key), 2);

        let left: Vec<(String, i64)> = store
            .documents("ds_2020-01")
            .unwrap()
            .iter()
            .map(|d| {
                (
                    d["file_date"].as_str().unwrap().to_string(),
                    d["file_id"].as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            left,
            vec![("2020-01-01".to_string(), 3), ("2020-01-02".to_string(), 2)]
        );
        assert_eq!(purge_partial_import(&store, "ds_2020-01", key), 0);
    }

    #[test]
    fn missing_collection_is_not_fatal() {
        let store = MemoryStore::new();
        let key = FileKey {
            partition: "2020-01-01".parse().unwrap(),
            file_id: 1,
        };
        assert_eq!(purge_partial_import(&store, "absent", key), 0);
    }
}
