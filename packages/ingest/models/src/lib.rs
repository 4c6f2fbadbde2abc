#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core types shared by the sensor archive crawler, the document store, and
//! the ingest pipeline.
//!
//! A [`Partition`] is one calendar day of the remote archive. Each day holds
//! many [`SourceFile`]s, one per sensor, and every committed file leaves an
//! [`ImportMark`] behind in the dataset's file index.

pub mod jobs;
pub mod progress;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single measurement row as stored in the document store.
///
/// Rows carry sensor-specific measurement columns, so they are kept as
/// free-form JSON objects rather than a fixed struct.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field holding the owning partition of a document.
pub const FIELD_FILE_DATE: &str = "file_date";
/// Field holding the file-id (sensor id) of a document.
pub const FIELD_FILE_ID: &str = "file_id";
/// Field holding the `[longitude, latitude]` pair of a document.
pub const FIELD_GEO_LOCATION: &str = "geo_location";
/// Field holding the measurement timestamp of a document.
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// A calendar-day partition of the archive (`YYYY-MM-DD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Partition(NaiveDate);

impl Partition {
    /// Wraps an already-parsed date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Returns the underlying date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }

    /// Returns the `YYYY-MM` key used to pick the monthly collection.
    #[must_use]
    pub fn year_month(&self) -> String {
        self.0.format("%Y-%m").to_string()
    }

    /// Parses a directory listing entry such as `2018-05-09/`.
    ///
    /// Returns `None` for anything that is not a date directory.
    #[must_use]
    pub fn from_listing_entry(entry: &str) -> Option<Self> {
        let name = entry.trim_end_matches('/');
        let name = name.rsplit('/').next().unwrap_or(name);
        name.parse().ok()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Error returned when a string is not a `YYYY-MM-DD` partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPartition(pub String);

impl fmt::Display for InvalidPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid partition key '{}' (expected YYYY-MM-DD)", self.0)
    }
}

impl std::error::Error for InvalidPartition {}

impl FromStr for Partition {
    type Err = InvalidPartition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| InvalidPartition(s.to_string()))
    }
}

impl TryFrom<String> for Partition {
    type Error = InvalidPartition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Partition> for String {
    fn from(value: Partition) -> Self {
        value.to_string()
    }
}

/// Extracts the sensor id from a file name following the
/// `{date}_{sensor_type}_{kind}_{sensor_id}.csv` convention.
///
/// The id is the integer token between the last `_` and the extension.
/// Paths and URLs are accepted; only the final segment is inspected.
#[must_use]
pub fn sensor_id_token(name: &str) -> Option<i64> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (stem, _extension) = file_name.rsplit_once('.')?;
    let (_, token) = stem.rsplit_once('_')?;
    token.parse().ok()
}

/// One CSV file published by the archive for a given day and sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Day the file belongs to.
    pub partition: Partition,
    /// Numeric sensor id; doubles as the file-id used for resume ordering.
    pub sensor_id: i64,
    /// Sensor model, e.g. `sds011`.
    pub sensor_type: String,
    /// File kind token, e.g. `sensor`.
    pub kind: String,
    /// File name as listed by the archive.
    pub file_name: String,
    /// Absolute URL of the remote file.
    pub url: String,
}

impl SourceFile {
    /// Builds a [`SourceFile`] from a listing entry.
    ///
    /// Returns `None` when the file name does not follow the
    /// `{date}_{sensor_type}_{kind}_{sensor_id}.{ext}` convention.
    #[must_use]
    pub fn parse(partition: Partition, file_name: &str, url: &str) -> Option<Self> {
        let sensor_id = sensor_id_token(file_name)?;
        let (stem, _) = file_name.rsplit_once('.')?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 4 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        Some(Self {
            partition,
            sensor_id,
            sensor_type: parts[1].to_string(),
            kind: parts[2..parts.len() - 1].join("_"),
            file_name: file_name.to_string(),
            url: url.to_string(),
        })
    }

    /// Returns the file-id used for ordering and progress tracking.
    #[must_use]
    pub const fn file_id(&self) -> i64 {
        self.sensor_id
    }

    /// Returns the `(partition, file-id)` key of this file.
    #[must_use]
    pub const fn key(&self) -> FileKey {
        FileKey {
            partition: self.partition,
            file_id: self.sensor_id,
        }
    }
}

impl AsRef<str> for SourceFile {
    fn as_ref(&self) -> &str {
        &self.file_name
    }
}

/// Identifies every document produced from one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileKey {
    /// Day the file belongs to.
    pub partition: Partition,
    /// Sensor id of the file.
    pub file_id: i64,
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.partition, self.file_id)
    }
}

/// Durable proof that all records of one source file were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMark {
    /// Partition of the committed file.
    pub file_date: Partition,
    /// File-id of the committed file.
    pub file_id: i64,
    /// When the mark was written.
    pub committed_at: DateTime<Utc>,
    /// Store-assigned insertion sequence; breaks `committed_at` ties.
    #[serde(default)]
    pub seq: u64,
}

impl ImportMark {
    /// Creates a mark for `key` stamped with the current time.
    ///
    /// The sequence is assigned by the store on insert.
    #[must_use]
    pub fn now(key: FileKey) -> Self {
        Self {
            file_date: key.partition,
            file_id: key.file_id,
            committed_at: Utc::now(),
            seq: 0,
        }
    }
}
