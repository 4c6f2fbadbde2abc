//! Reading mirrored CSV files into documents.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use sensor_archive_ingest_models::{
    Document, FIELD_FILE_DATE, FIELD_FILE_ID, FIELD_GEO_LOCATION, FIELD_TIMESTAMP, FileKey,
    Partition, sensor_id_token,
};
use serde_json::Value;

use crate::IngestError;

const FIELD_LATITUDE: &str = "lat";
const FIELD_LONGITUDE: &str = "lon";

/// A mirrored CSV file ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Partition and file-id of the file.
    pub key: FileKey,
    /// File name within the partition directory.
    pub file_name: String,
    /// Full path.
    pub path: PathBuf,
}

impl AsRef<str> for LocalFile {
    fn as_ref(&self) -> &str {
        &self.file_name
    }
}

/// Lists the partition directories of the mirror, newest first.
///
/// Entries that are not `YYYY-MM-DD` directories are ignored. A missing
/// mirror yields no partitions.
///
/// # Errors
///
/// Returns [`IngestError::Io`] if the mirror directory cannot be read.
pub fn list_local_partitions(mirror_dir: &Path) -> Result<Vec<Partition>, IngestError> {
    let entries = match std::fs::read_dir(mirror_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IngestError::io(mirror_dir)(e)),
    };

    let mut partitions: Vec<Partition> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(IngestError::io(mirror_dir))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(partition) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            partitions.push(partition);
        }
    }

    partitions.sort_unstable_by(|a, b| b.cmp(a));
    Ok(partitions)
}

/// Lists the CSV files of one mirrored partition in ascending file-id
/// order.
///
/// Files without a numeric id token are skipped.
///
/// # Errors
///
/// Returns [`IngestError::Io`] if the partition directory cannot be read.
pub fn list_local_files(
    mirror_dir: &Path,
    partition: Partition,
) -> Result<Vec<LocalFile>, IngestError> {
    let dir = mirror_dir.join(partition.to_string());
    let mut files = Vec::new();

    for entry in std::fs::read_dir(&dir).map_err(IngestError::io(&dir))? {
        let entry = entry.map_err(IngestError::io(&dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }
        let Some(file_id) = sensor_id_token(&file_name) else {
            log::debug!("Skipping {} (no sensor id in name)", path.display());
            continue;
        };

        files.push(LocalFile {
            key: FileKey { partition, file_id },
            file_name,
            path,
        });
    }

    files.sort_by(|a, b| {
        a.key
            .file_id
            .cmp(&b.key.file_id)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(files)
}

/// Reads every row of a CSV file into documents tagged with `key`.
///
/// Columns with an empty header (a leading row-number column, for
/// instance) are dropped.
///
/// # Errors
///
/// Returns [`IngestError::Csv`] if the file cannot be opened or parsed.
pub fn read_records(path: &Path, key: FileKey, delimiter: u8) -> Result<Vec<Document>, IngestError> {
    let csv_error = |source| IngestError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        records.push(transform_row(&headers, &row, key));
    }

    log::debug!("{} rows read from {}", records.len(), path.display());
    Ok(records)
}

/// Converts one CSV row into a tagged document.
#[must_use]
pub fn transform_row(headers: &[String], row: &csv::StringRecord, key: FileKey) -> Document {
    let mut document = Document::new();
    for (i, header) in headers.iter().enumerate() {
        if header.is_empty() {
            continue;
        }
        let raw = row.get(i).unwrap_or("");
        let value = if header == FIELD_TIMESTAMP {
            parse_timestamp(raw)
        } else {
            parse_value(raw)
        };
        document.insert(header.clone(), value);
    }

    document.insert(
        FIELD_FILE_DATE.to_string(),
        Value::String(key.partition.to_string()),
    );
    document.insert(FIELD_FILE_ID.to_string(), Value::from(key.file_id));
    apply_geo(&mut document);
    document
}

/// Replaces the `lat` / `lon` fields with a `[longitude, latitude]` pair.
///
/// Missing coordinates become `null` inside the pair.
pub fn apply_geo(document: &mut Document) {
    let latitude = document.remove(FIELD_LATITUDE).unwrap_or(Value::Null);
    let longitude = document.remove(FIELD_LONGITUDE).unwrap_or(Value::Null);
    document.insert(
        FIELD_GEO_LOCATION.to_string(),
        Value::Array(vec![longitude, latitude]),
    );
}

fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        // NaN / inf have no JSON representation.
        return serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number);
    }
    Value::String(raw.to_string())
}

/// Normalizes a timestamp to RFC 3339. Naive timestamps are taken as UTC;
/// anything unparseable is kept verbatim.
fn parse_timestamp(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Value::String(ts.to_rfc3339());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map_or_else(
            || Value::String(raw.to_string()),
            |ts| Value::String(ts.and_utc().to_rfc3339()),
        )
}
