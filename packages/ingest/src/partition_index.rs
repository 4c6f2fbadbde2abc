//! Collection lifecycle for one job run.

use std::collections::BTreeSet;

use sensor_archive_database::store::{data_collection_name, file_index_name};
use sensor_archive_database::{CollectionKind, DbError, DocumentStore};
use sensor_archive_ingest_models::Partition;

/// Creates the collections a job writes to, truncating each one at most
/// once per run when asked to.
pub struct PartitionIndexManager<'a> {
    store: &'a dyn DocumentStore,
    dataset: String,
    truncate: bool,
    prepared: BTreeSet<String>,
}

impl<'a> PartitionIndexManager<'a> {
    /// Creates a manager for `dataset`.
    #[must_use]
    pub fn new(store: &'a dyn DocumentStore, dataset: &str, truncate: bool) -> Self {
        Self {
            store,
            dataset: dataset.to_string(),
            truncate,
            prepared: BTreeSet::new(),
        }
    }

    /// Prepares the file index and returns its name.
    ///
    /// The index is dropped first when truncating, or when it exists but
    /// holds no marks.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be queried or updated.
    pub fn prepare_file_index(&mut self) -> Result<String, DbError> {
        let name = file_index_name(&self.dataset);
        if self.prepared.contains(&name) {
            return Ok(name);
        }

        if self.store.collection_exists(&name)? {
            if self.truncate {
                log::warn!("File index '{name}' will be deleted (truncate)");
                self.store.drop_collection(&name)?;
            } else if self.store.count(&name)? == 0 {
                log::info!("File index '{name}' is empty and will be recreated");
                self.store.drop_collection(&name)?;
            }
        }

        if !self.store.collection_exists(&name)? {
            log::info!("Creating file index '{name}'");
        }
        self.store.create_collection(&name, CollectionKind::FileIndex)?;
        self.prepared.insert(name.clone());
        Ok(name)
    }

    /// Returns the data collection of a partition, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be queried or updated.
    pub fn collection_for(&mut self, partition: Partition) -> Result<String, DbError> {
        let name = data_collection_name(&self.dataset, partition);
        if self.prepared.contains(&name) {
            return Ok(name);
        }

        let exists = self.store.collection_exists(&name)?;
        if exists && self.truncate {
            log::warn!("Collection '{name}' will be deleted (truncate)");
            self.store.drop_collection(&name)?;
        }
        if !exists || self.truncate {
            log::info!("Creating collection '{name}'");
        }
        self.store.create_collection(&name, CollectionKind::Documents)?;
        self.prepared.insert(name.clone());
        Ok(name)
    }
}
