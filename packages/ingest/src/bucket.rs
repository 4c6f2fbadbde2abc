//! Bounded batches of documents and their two-step commit.

use std::time::Instant;

use sensor_archive_database::{DbError, DocumentStore};
use sensor_archive_ingest_models::{Document, FileKey};

use crate::tracker::ProgressTracker;

/// Why a bucket could not be committed.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// The bulk write failed; no marks were written.
    #[error("Bulk write into {collection} failed: {source}")]
    BulkWrite {
        /// Target collection.
        collection: String,
        /// Store error.
        source: DbError,
    },

    /// The documents are stored but a mark could not be written.
    #[error("Writing the import mark of {key} failed: {source}")]
    MarkWrite {
        /// File whose mark failed.
        key: FileKey,
        /// Store error.
        source: DbError,
    },
}

/// Documents waiting for a bulk write, with the files they came from.
#[derive(Debug, Default)]
pub struct Bucket {
    records: Vec<Document>,
    files: Vec<FileKey>,
    threshold: usize,
}

impl Bucket {
    /// Creates an empty bucket holding about `threshold` documents.
    #[must_use]
    pub const fn new(threshold: usize) -> Self {
        Self {
            records: Vec::new(),
            files: Vec::new(),
            threshold,
        }
    }

    /// Number of buffered documents.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether neither documents nor files are buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty() && self.files.is_empty()
    }

    /// Files in the bucket, in the order they were added.
    #[must_use]
    pub fn files(&self) -> &[FileKey] {
        &self.files
    }

    /// Returns whether adding `incoming` documents must flush first.
    #[must_use]
    pub const fn needs_flush(&self, incoming: usize) -> bool {
        !self.is_empty() && self.records.len() + incoming > self.threshold
    }

    fn push(&mut self, key: FileKey, records: Vec<Document>) {
        self.records.extend(records);
        self.files.push(key);
    }

    fn clear(&mut self) {
        self.records.clear();
        self.files.clear();
    }
}

/// Totals of a [`BatchLoader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Completed flushes.
    pub flushes: usize,
    /// Documents written.
    pub documents: u64,
    /// Marks written.
    pub marks: u64,
}

/// Loads whole files into one collection through a [`Bucket`].
pub struct BatchLoader<'a> {
    store: &'a dyn DocumentStore,
    tracker: &'a ProgressTracker<'a>,
    collection: String,
    bucket: Bucket,
    stats: LoadStats,
}

impl<'a> BatchLoader<'a> {
    /// Creates a loader writing into `collection`.
    #[must_use]
    pub fn new(
        store: &'a dyn DocumentStore,
        tracker: &'a ProgressTracker<'a>,
        collection: &str,
        threshold: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            collection: collection.to_string(),
            bucket: Bucket::new(threshold),
            stats: LoadStats::default(),
        }
    }

    /// Counts so far.
    #[must_use]
    pub const fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Adds all documents of one file.
    ///
    /// If the bucket already holds documents and the file would push it past
    /// the threshold, the bucket is flushed first.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError`] if that flush fails.
    pub fn add_file(&mut self, key: FileKey, records: Vec<Document>) -> Result<(), FlushError> {
        if self.bucket.needs_flush(records.len()) {
            self.flush()?;
        }
        self.bucket.push(key, records);
        Ok(())
    }

    /// Writes the buffered documents, then one mark per file in the order
    /// the files were added, then empties the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError::BulkWrite`] if the documents cannot be written
    /// (no marks are written then) and [`FlushError::MarkWrite`] at the
    /// first mark that fails (later marks are not attempted).
    pub fn flush(&mut self) -> Result<(), FlushError> {
        if self.bucket.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let items = self.bucket.len();

        if items > 0 {
            self.store
                .bulk_insert(&self.collection, &self.bucket.records)
                .map_err(|source| FlushError::BulkWrite {
                    collection: self.collection.clone(),
                    source,
                })?;
            self.stats.documents += items as u64;
        }

        for &key in &self.bucket.files {
            self.tracker
                .commit(key)
                .map_err(|source| FlushError::MarkWrite { key, source })?;
            self.stats.marks += 1;
        }

        let duration = start.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let speed = if duration > 0.0 {
            items as f64 / duration
        } else {
            0.0
        };
        log::info!(
            "Wrote {items} items ({} files) into {} in {duration:.3}s ({speed:.2} items/s)",
            self.bucket.files.len(),
            self.collection
        );

        self.stats.flushes += 1;
        self.bucket.clear();
        Ok(())
    }

    /// Flushes whatever is left and returns the totals.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError`] if the final flush fails.
    pub fn finish(mut self) -> Result<LoadStats, FlushError> {
        self.flush()?;
        Ok(self.stats)
    }

    /// Drops the unflushed bucket and returns the totals.
    ///
    /// Nothing of the dropped files was written, so they are picked up again
    /// by the next run.
    #[must_use]
    pub fn abandon(self) -> LoadStats {
        if !self.bucket.is_empty() {
            log::warn!(
                "Discarding {} unflushed items of {} files",
                self.bucket.len(),
                self.bucket.files.len()
            );
        }
        self.stats
    }
}
