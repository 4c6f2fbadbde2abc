//! In-process [`DocumentStore`].
//!
//! Holds every collection in a `BTreeMap` behind a `Mutex`. Useful for
//! pipeline tests and dry runs that should not touch the on-disk store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use sensor_archive_ingest_models::{Document, ImportMark, Partition};

use crate::DbError;
use crate::store::{CollectionKind, DocumentStore, DocumentTags, GeoBounds, validate_name};

#[derive(Debug)]
enum Collection {
    Documents(Vec<(DocumentTags, Document)>),
    FileIndex(Vec<ImportMark>),
}

/// A document store that lives entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Collection>>, DbError> {
        self.collections.lock().map_err(|_| DbError::Poisoned)
    }

    /// Returns a copy of every document in a data collection, in insertion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the collection is missing or is a file index.
    pub fn documents(&self, name: &str) -> Result<Vec<Document>, DbError> {
        let collections = self.lock()?;
        match collections.get(name) {
            Some(Collection::Documents(docs)) => Ok(docs.iter().map(|(_, d)| d.clone()).collect()),
            Some(Collection::FileIndex(_)) => Err(wrong_kind(name, CollectionKind::Documents)),
            None => Err(missing(name)),
        }
    }

    /// Returns a copy of every mark in a file index, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the collection is missing or holds documents.
    pub fn marks(&self, name: &str) -> Result<Vec<ImportMark>, DbError> {
        let collections = self.lock()?;
        match collections.get(name) {
            Some(Collection::FileIndex(marks)) => Ok(marks.clone()),
            Some(Collection::Documents(_)) => Err(wrong_kind(name, CollectionKind::FileIndex)),
            None => Err(missing(name)),
        }
    }
}

fn missing(name: &str) -> DbError {
    DbError::MissingCollection {
        name: name.to_string(),
    }
}

fn wrong_kind(name: &str, expected: CollectionKind) -> DbError {
    DbError::WrongKind {
        name: name.to_string(),
        expected,
    }
}

impl DocumentStore for MemoryStore {
    fn ping(&self) -> Result<(), DbError> {
        self.lock().map(|_| ())
    }

    fn list_collections(&self) -> Result<Vec<String>, DbError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn collection_exists(&self, name: &str) -> Result<bool, DbError> {
        Ok(self.lock()?.contains_key(name))
    }

    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), DbError> {
        validate_name(name)?;
        self.lock()?
            .entry(name.to_string())
            .or_insert_with(|| match kind {
                CollectionKind::Documents => Collection::Documents(Vec::new()),
                CollectionKind::FileIndex => Collection::FileIndex(Vec::new()),
            });
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        self.lock()?.remove(name);
        Ok(())
    }

    fn count(&self, name: &str) -> Result<u64, DbError> {
        let collections = self.lock()?;
        let len = match collections.get(name) {
            Some(Collection::Documents(docs)) => docs.len(),
            Some(Collection::FileIndex(marks)) => marks.len(),
            None => return Err(missing(name)),
        };
        Ok(len as u64)
    }

    fn bulk_insert(&self, name: &str, documents: &[Document]) -> Result<u64, DbError> {
        let rows = documents
            .iter()
            .map(|doc| Ok((DocumentTags::extract(doc)?, doc.clone())))
            .collect::<Result<Vec<_>, DbError>>()?;

        let mut collections = self.lock()?;
        match collections.get_mut(name) {
            Some(Collection::Documents(docs)) => {
                let count = rows.len() as u64;
                docs.extend(rows);
                Ok(count)
            }
            Some(Collection::FileIndex(_)) => Err(wrong_kind(name, CollectionKind::Documents)),
            None => Err(missing(name)),
        }
    }

    fn delete_by_file(
        &self,
        name: &str,
        file_date: Partition,
        file_id: i64,
    ) -> Result<u64, DbError> {
        let mut collections = self.lock()?;
        match collections.get_mut(name) {
            Some(Collection::Documents(docs)) => {
                let before = docs.len();
                docs.retain(|(tags, _)| !(tags.file_date == file_date && tags.file_id == file_id));
                Ok((before - docs.len()) as u64)
            }
            Some(Collection::FileIndex(_)) => Err(wrong_kind(name, CollectionKind::Documents)),
            None => Err(missing(name)),
        }
    }

    fn insert_mark(&self, name: &str, mark: &ImportMark) -> Result<(), DbError> {
        let mut collections = self.lock()?;
        match collections.get_mut(name) {
            Some(Collection::FileIndex(marks)) => {
                let seq = marks.iter().map(|m| m.seq).max().unwrap_or(0) + 1;
                marks.push(ImportMark {
                    seq,
                    ..mark.clone()
                });
                Ok(())
            }
            Some(Collection::Documents(_)) => Err(wrong_kind(name, CollectionKind::FileIndex)),
            None => Err(missing(name)),
        }
    }

    fn latest_mark(
        &self,
        name: &str,
        file_date: Partition,
    ) -> Result<Option<ImportMark>, DbError> {
        let collections = self.lock()?;
        match collections.get(name) {
            Some(Collection::FileIndex(marks)) => Ok(marks
                .iter()
                .filter(|m| m.file_date == file_date)
                .max_by_key(|m| (m.committed_at, m.seq))
                .cloned()),
            Some(Collection::Documents(_)) => Err(wrong_kind(name, CollectionKind::FileIndex)),
            None => Err(missing(name)),
        }
    }

    fn count_marks(&self, name: &str, file_date: Partition) -> Result<u64, DbError> {
        let collections = self.lock()?;
        match collections.get(name) {
            Some(Collection::FileIndex(marks)) => {
                Ok(marks.iter().filter(|m| m.file_date == file_date).count() as u64)
            }
            Some(Collection::Documents(_)) => Err(wrong_kind(name, CollectionKind::FileIndex)),
            None => Err(missing(name)),
        }
    }

    fn located_documents_within(
        &self,
        name: &str,
        bounds: &GeoBounds,
    ) -> Result<Vec<Document>, DbError> {
        let collections = self.lock()?;
        match collections.get(name) {
            Some(Collection::Documents(docs)) => Ok(docs
                .iter()
                .filter(|(tags, _)| {
                    tags.location
                        .is_some_and(|(lon, lat)| bounds.contains(lon, lat))
                })
                .map(|(_, doc)| doc.clone())
                .collect()),
            Some(Collection::FileIndex(_)) => Err(wrong_kind(name, CollectionKind::Documents)),
            None => Err(missing(name)),
        }
    }
}
