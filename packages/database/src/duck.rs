//! `DuckDB`-backed [`DocumentStore`].
//!
//! Every collection is one table. Data collections keep the tags the
//! pipeline filters on (`file_date`, `file_id`, timestamp, coordinates) as
//! columns next to the full JSON body; file indexes keep one row per mark.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::Connection;
use sensor_archive_ingest_models::{Document, ImportMark, Partition};

use crate::DbError;
use crate::store::{CollectionKind, DocumentStore, DocumentTags, GeoBounds, validate_name};

/// Number of rows per INSERT statement.
const CHUNK_SIZE: usize = 2_000;

/// A document store persisted in a single `DuckDB` file.
///
/// `duckdb::Connection` is `Send` but not `Sync`, so the connection lives
/// behind a `Mutex`.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory or the database cannot be
    /// opened.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened document store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a transient in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if `DuckDB` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }
}

fn table(name: &str) -> Result<String, DbError> {
    validate_name(name)?;
    Ok(format!("\"{name}\""))
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn format_committed_at(at: &DateTime<Utc>) -> String {
    // Fixed-width UTC so that text ordering matches time ordering.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_committed_at(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid committed_at '{s}': {e}"),
        })
}

impl DocumentStore for DuckDbStore {
    fn ping(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn list_collections(&self) -> Result<Vec<String>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = 'main'
             ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn collection_exists(&self, name: &str) -> Result<bool, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'main' AND table_name = ?",
        )?;
        let count: i64 = stmt.query_row([name], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), DbError> {
        let table = table(name)?;
        let sql = match kind {
            CollectionKind::Documents => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    file_date TEXT NOT NULL,
                    file_id BIGINT NOT NULL,
                    measured_at TEXT,
                    longitude DOUBLE,
                    latitude DOUBLE,
                    body TEXT NOT NULL
                )"
            ),
            CollectionKind::FileIndex => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    seq BIGINT NOT NULL,
                    file_date TEXT NOT NULL,
                    file_id BIGINT NOT NULL,
                    committed_at TEXT NOT NULL
                )"
            ),
        };

        self.lock()?.execute_batch(&sql)?;
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        let table = table(name)?;
        self.lock()?
            .execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        Ok(())
    }

    fn count(&self, name: &str) -> Result<u64, DbError> {
        let table = table(name)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(to_u64(count))
    }

    fn bulk_insert(&self, name: &str, documents: &[Document]) -> Result<u64, DbError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let table = table(name)?;

        let rows = documents
            .iter()
            .map(|doc| Ok((DocumentTags::extract(doc)?, serde_json::to_string(doc)?)))
            .collect::<Result<Vec<_>, DbError>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut total = 0u64;

        for chunk in rows.chunks(CHUNK_SIZE) {
            let mut sql = format!(
                "INSERT INTO {table} (file_date, file_id, measured_at, longitude, latitude, body) VALUES "
            );
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str("(?, ?, ?, ?, ?, ?)");
            }

            let mut stmt = tx.prepare(&sql)?;
            let mut param_idx = 1usize;

            for (tags, body) in chunk {
                stmt.raw_bind_parameter(param_idx, tags.file_date.to_string())?;
                stmt.raw_bind_parameter(param_idx + 1, tags.file_id)?;
                stmt.raw_bind_parameter(param_idx + 2, tags.timestamp.as_deref())?;
                stmt.raw_bind_parameter(param_idx + 3, tags.location.map(|(lon, _)| lon))?;
                stmt.raw_bind_parameter(param_idx + 4, tags.location.map(|(_, lat)| lat))?;
                stmt.raw_bind_parameter(param_idx + 5, body.as_str())?;
                param_idx += 6;
            }

            let inserted = stmt.raw_execute()?;
            total += u64::try_from(inserted).unwrap_or(0);
        }

        tx.commit()?;
        Ok(total)
    }

    fn delete_by_file(
        &self,
        name: &str,
        file_date: Partition,
        file_id: i64,
    ) -> Result<u64, DbError> {
        let table = table(name)?;
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {table} WHERE file_date = ? AND file_id = ?"),
            duckdb::params![file_date.to_string(), file_id],
        )?;
        Ok(u64::try_from(deleted).unwrap_or(0))
    }

    fn insert_mark(&self, name: &str, mark: &ImportMark) -> Result<(), DbError> {
        let table = table(name)?;
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!("SELECT COALESCE(MAX(seq), 0) FROM {table}"))?;
        let last_seq: i64 = stmt.query_row([], |row| row.get(0))?;

        conn.execute(
            &format!(
                "INSERT INTO {table} (seq, file_date, file_id, committed_at) VALUES (?, ?, ?, ?)"
            ),
            duckdb::params![
                last_seq + 1,
                mark.file_date.to_string(),
                mark.file_id,
                format_committed_at(&mark.committed_at),
            ],
        )?;
        Ok(())
    }

    fn latest_mark(
        &self,
        name: &str,
        file_date: Partition,
    ) -> Result<Option<ImportMark>, DbError> {
        let table = table(name)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT seq, file_id, committed_at FROM {table}
             WHERE file_date = ?
             ORDER BY committed_at DESC, seq DESC
             LIMIT 1"
        ))?;

        let result = stmt.query_row([file_date.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        });

        match result {
            Ok((seq, file_id, committed_at)) => Ok(Some(ImportMark {
                file_date,
                file_id,
                committed_at: parse_committed_at(&committed_at)?,
                seq: to_u64(seq),
            })),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::DuckDb(e)),
        }
    }

    fn count_marks(&self, name: &str, file_date: Partition) -> Result<u64, DbError> {
        let table = table(name)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT COUNT(*) FROM {table} WHERE file_date = ?"
        ))?;
        let count: i64 = stmt.query_row([file_date.to_string()], |row| row.get(0))?;
        Ok(to_u64(count))
    }

    fn located_documents_within(
        &self,
        name: &str,
        bounds: &GeoBounds,
    ) -> Result<Vec<Document>, DbError> {
        let table = table(name)?;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT body FROM {table}
             WHERE longitude BETWEEN ? AND ?
               AND latitude BETWEEN ? AND ?"
        ))?;
        let bodies = stmt
            .query_map(
                duckdb::params![bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str::<Document>(body).map_err(DbError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use serde_json::json;

    use super::*;

    fn doc(file_date: &str, file_id: i64, lon: f64, lat: f64) -> Document {
        json!({
            "file_date": file_date,
            "file_id": file_id,
            "timestamp": "2020-01-01T00:00:00+00:00",
            "sensor_id": file_id,
            "geo_location": [lon, lat],
            "P1": 10.5,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn partition(s: &str) -> Partition {
        s.parse().unwrap()
    }

    #[test]
    fn creates_collections_idempotently() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();
        store
            .create_collection("ds_file_index", CollectionKind::FileIndex)
            .unwrap();

        assert!(store.collection_exists("ds_2020-01").unwrap());
        assert_eq!(
            store.list_collections().unwrap(),
            vec!["ds_2020-01".to_string(), "ds_file_index".to_string()]
        );

        store.drop_collection("ds_2020-01").unwrap();
        assert!(!store.collection_exists("ds_2020-01").unwrap());
    }

    #[test]
    fn deletes_exactly_one_file() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();

        let docs = vec![
            doc("2020-01-01", 1, 9.1, 48.7),
            doc("2020-01-01", 1, 9.1, 48.7),
            doc("2020-01-01", 2, 9.2, 48.8),
            doc("2020-01-02", 1, 9.3, 48.9),
        ];
        assert_eq!(store.bulk_insert("ds_2020-01", &docs).unwrap(), 4);

        let deleted = store
            .delete_by_file("ds_2020-01", partition("2020-01-01"), 1)
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("ds_2020-01").unwrap(), 2);
    }

    #[test]
    fn rejects_untagged_documents_without_writing() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();

        let mut broken = doc("2020-01-01", 1, 9.1, 48.7);
        broken.remove("file_id");
        let docs = vec![doc("2020-01-01", 2, 9.1, 48.7), broken];

        assert!(store.bulk_insert("ds_2020-01", &docs).is_err());
        assert_eq!(store.count("ds_2020-01").unwrap(), 0);
    }

    #[test]
    fn latest_mark_breaks_ties_by_sequence() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_file_index", CollectionKind::FileIndex)
            .unwrap();

        let at = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        for file_id in [3, 7, 5] {
            let mark = ImportMark {
                file_date: partition("2020-01-01"),
                file_id,
                committed_at: at,
                seq: 0,
            };
            store.insert_mark("ds_file_index", &mark).unwrap();
        }

        let latest = store
            .latest_mark("ds_file_index", partition("2020-01-01"))
            .unwrap()
            .unwrap();
        assert_eq!(latest.file_id, 5);
        assert_eq!(latest.seq, 3);
        assert_eq!(latest.committed_at, at);
        assert_eq!(
            store
                .count_marks("ds_file_index", partition("2020-01-01"))
                .unwrap(),
            3
        );
        assert!(
            store
                .latest_mark("ds_file_index", partition("2020-01-02"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn returns_located_documents() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();

        let mut unlocated = doc("2020-01-01", 3, 0.0, 0.0);
        unlocated.insert("geo_location".to_string(), json!([null, null]));
        store
            .bulk_insert("ds_2020-01", &[doc("2020-01-01", 1, 9.1, 48.7), unlocated])
            .unwrap();

        let located = store
            .located_documents_within("ds_2020-01", &GeoBounds::WORLD)
            .unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0]["geo_location"], json!([9.1, 48.7]));
    }

    #[test]
    fn filters_located_documents_by_box() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store
            .create_collection("ds_2020-01", CollectionKind::Documents)
            .unwrap();
        store
            .bulk_insert(
                "ds_2020-01",
                &[
                    doc("2020-01-01", 1, 9.18, 48.78),
                    doc("2020-01-01", 2, 13.40, 52.52),
                ],
            )
            .unwrap();

        let stuttgart = GeoBounds::around(48.7758, 9.1829, 10.0);
        let located = store
            .located_documents_within("ds_2020-01", &stuttgart)
            .unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0]["file_id"], json!(1));
    }
}
