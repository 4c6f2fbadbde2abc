//! Import progress per partition.
//!
//! Every committed file leaves an [`ImportMark`] in the dataset's file
//! index. The newest mark of a partition is the resume point of the next
//! run: files are walked in ascending file-id order and everything up to
//! and including the marked file is skipped.

use sensor_archive_database::store::file_index_name;
use sensor_archive_database::{DbError, DocumentStore};
use sensor_archive_ingest_models::{FileKey, ImportMark, Partition};

/// Where a partition's previous import stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePoint {
    /// File-id of the most recently committed file.
    pub last_file_id: Option<i64>,
    /// Marks already present for the partition.
    pub committed_files: u64,
}

/// Reads and writes the import marks of one dataset.
pub struct ProgressTracker<'a> {
    store: &'a dyn DocumentStore,
    index_name: String,
}

impl<'a> ProgressTracker<'a> {
    /// Creates a tracker for the file index of `dataset`.
    #[must_use]
    pub fn new(store: &'a dyn DocumentStore, dataset: &str) -> Self {
        Self {
            store,
            index_name: file_index_name(dataset),
        }
    }

    /// Name of the file index collection.
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Computes the resume point of a partition.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file index cannot be queried.
    pub fn resume_point(&self, partition: Partition) -> Result<ResumePoint, DbError> {
        let committed_files = self.store.count_marks(&self.index_name, partition)?;
        if committed_files == 0 {
            return Ok(ResumePoint::default());
        }

        let last_file_id = self
            .store
            .latest_mark(&self.index_name, partition)?
            .map(|mark| mark.file_id);

        log::info!("{committed_files} files of {partition} have already been imported");
        if let Some(id) = last_file_id {
            log::info!("The last imported id for {partition} was {id}");
        }

        Ok(ResumePoint {
            last_file_id,
            committed_files,
        })
    }

    /// Records that every row of `key` is stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the mark cannot be written.
    pub fn commit(&self, key: FileKey) -> Result<(), DbError> {
        self.store.insert_mark(&self.index_name, &ImportMark::now(key))
    }
}

/// Decides which files of an ascending file-id walk still need importing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeCursor {
    /// Nothing imported yet; every file is admitted.
    Fresh,
    /// Skipping until the marked file-id is seen.
    Seeking(i64),
    /// The marked file was passed; every later file is admitted.
    Passed,
}

impl ResumeCursor {
    /// Creates a cursor from a partition's resume point.
    #[must_use]
    pub const fn from_marker(last_file_id: Option<i64>) -> Self {
        match last_file_id {
            Some(id) => Self::Seeking(id),
            None => Self::Fresh,
        }
    }

    /// Returns whether the file should be imported, advancing the cursor.
    ///
    /// The marked file itself is not admitted. If the marked id never shows
    /// up, nothing is admitted.
    pub const fn admit(&mut self, file_id: i64) -> bool {
        match *self {
            Self::Fresh | Self::Passed => true,
            Self::Seeking(marker) => {
                if file_id == marker {
                    *self = Self::Passed;
                }
                false
            }
        }
    }
}
