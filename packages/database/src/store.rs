//! The [`DocumentStore`] trait and collection naming helpers.

use std::fmt;

use sensor_archive_ingest_models::{
    Document, FIELD_FILE_DATE, FIELD_FILE_ID, FIELD_GEO_LOCATION, FIELD_TIMESTAMP, ImportMark,
    Partition,
};

use crate::DbError;

/// What a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Measurement documents.
    Documents,
    /// Append-only [`ImportMark`]s.
    FileIndex,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Documents => "documents",
            Self::FileIndex => "file index",
        })
    }
}

/// Storage backend for measurement documents and import marks.
///
/// Bulk writes are atomic on their own, but nothing makes a bulk write and
/// the marks that follow it atomic together. Callers recover from a
/// half-finished commit by deleting a file's documents before re-importing
/// it (see [`DocumentStore::delete_by_file`]).
pub trait DocumentStore: Send + Sync {
    /// Checks that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be queried.
    fn ping(&self) -> Result<(), DbError>;

    /// Lists every collection, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the catalog cannot be read.
    fn list_collections(&self) -> Result<Vec<String>, DbError>;

    /// Returns whether the collection exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the catalog cannot be read.
    fn collection_exists(&self, name: &str) -> Result<bool, DbError>;

    /// Creates the collection if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the name is invalid or creation fails.
    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), DbError>;

    /// Drops the collection and everything in it. Missing collections are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the drop fails.
    fn drop_collection(&self, name: &str) -> Result<(), DbError>;

    /// Returns the number of entries (documents or marks) in a collection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the collection is missing or the count fails.
    fn count(&self, name: &str) -> Result<u64, DbError>;

    /// Writes all documents in one unit: either every document is stored
    /// or none is.
    ///
    /// Returns the number of documents written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any document is missing its `file_date` /
    /// `file_id` tags or the write fails.
    fn bulk_insert(&self, name: &str, documents: &[Document]) -> Result<u64, DbError>;

    /// Deletes every document tagged with exactly `(file_date, file_id)`.
    ///
    /// Returns the number of documents removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    fn delete_by_file(&self, name: &str, file_date: Partition, file_id: i64)
    -> Result<u64, DbError>;

    /// Appends a mark to a file index. The store assigns the mark's
    /// sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    fn insert_mark(&self, name: &str, mark: &ImportMark) -> Result<(), DbError>;

    /// Returns the most recently committed mark of a partition: greatest
    /// `committed_at`, ties broken by greatest sequence.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn latest_mark(&self, name: &str, file_date: Partition)
    -> Result<Option<ImportMark>, DbError>;

    /// Returns how many marks a partition has.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn count_marks(&self, name: &str, file_date: Partition) -> Result<u64, DbError>;

    /// Returns the documents of a collection whose geo location lies inside
    /// `bounds`, edges included.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the scan fails.
    fn located_documents_within(
        &self,
        name: &str,
        bounds: &GeoBounds,
    ) -> Result<Vec<Document>, DbError>;
}

/// Mean earth radius in kilometres, as used by `geo`'s Haversine.
const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// A longitude/latitude box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl GeoBounds {
    /// The whole globe.
    pub const WORLD: Self = Self {
        min_lon: -180.0,
        max_lon: 180.0,
        min_lat: -90.0,
        max_lat: 90.0,
    };

    /// Returns the smallest box holding every point within `distance_km`
    /// (great-circle) of the given center.
    ///
    /// The box spans all longitudes when the circle reaches a pole or
    /// crosses the antimeridian.
    #[must_use]
    pub fn around(latitude: f64, longitude: f64, distance_km: f64) -> Self {
        let angular = distance_km.max(0.0) / EARTH_RADIUS_KM;
        let lat = latitude.to_radians();
        let min_lat = lat - angular;
        let max_lat = lat + angular;

        if min_lat <= -std::f64::consts::FRAC_PI_2 || max_lat >= std::f64::consts::FRAC_PI_2 {
            return Self {
                min_lat: min_lat.to_degrees().max(-90.0),
                max_lat: max_lat.to_degrees().min(90.0),
                ..Self::WORLD
            };
        }

        let delta_lon = (angular.sin() / lat.cos()).asin().to_degrees();
        let min_lon = longitude - delta_lon;
        let max_lon = longitude + delta_lon;
        if delta_lon.is_nan() || min_lon < -180.0 || max_lon > 180.0 {
            return Self {
                min_lat: min_lat.to_degrees(),
                max_lat: max_lat.to_degrees(),
                ..Self::WORLD
            };
        }

        Self {
            min_lon,
            max_lon,
            min_lat: min_lat.to_degrees(),
            max_lat: max_lat.to_degrees(),
        }
    }

    /// Returns whether the point lies inside the box, edges included.
    #[must_use]
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&longitude)
            && (self.min_lat..=self.max_lat).contains(&latitude)
    }
}

/// Returns the monthly data collection of a dataset (`{dataset}_{YYYY-MM}`).
#[must_use]
pub fn data_collection_name(dataset: &str, partition: Partition) -> String {
    format!("{dataset}_{}", partition.year_month())
}

/// Returns the file index collection of a dataset.
#[must_use]
pub fn file_index_name(dataset: &str) -> String {
    format!("{dataset}_file_index")
}

/// Validates a collection name for use as a table identifier.
///
/// Names may contain ASCII letters, digits, `_` and `-`.
///
/// # Errors
///
/// Returns [`DbError::InvalidCollectionName`] for anything else.
pub fn validate_name(name: &str) -> Result<(), DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidCollectionName {
            name: name.to_string(),
        })
    }
}

/// The indexed columns pulled out of a document before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTags {
    /// Owning partition.
    pub file_date: Partition,
    /// Owning file-id.
    pub file_id: i64,
    /// Measurement timestamp, if present.
    pub timestamp: Option<String>,
    /// `[longitude, latitude]`, if both are numeric.
    pub location: Option<(f64, f64)>,
}

impl DocumentTags {
    /// Extracts the tags every stored document must carry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if `file_date` or `file_id` is
    /// missing or malformed.
    pub fn extract(document: &Document) -> Result<Self, DbError> {
        let file_date = document
            .get(FIELD_FILE_DATE)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<Partition>().ok())
            .ok_or_else(|| DbError::Conversion {
                message: format!("document without a valid {FIELD_FILE_DATE}"),
            })?;
        let file_id = document
            .get(FIELD_FILE_ID)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| DbError::Conversion {
                message: format!("document without a valid {FIELD_FILE_ID}"),
            })?;
        let timestamp = document
            .get(FIELD_TIMESTAMP)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let location = document
            .get(FIELD_GEO_LOCATION)
            .and_then(serde_json::Value::as_array)
            .and_then(|pair| match pair.as_slice() {
                [lon, lat] => Some((lon.as_f64()?, lat.as_f64()?)),
                _ => None,
            });

        Ok(Self {
            file_date,
            file_id,
            timestamp,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_collection_names() {
        let partition: Partition = "2020-01-31".parse().unwrap();
        assert_eq!(
            data_collection_name("luftdaten_weather", partition),
            "luftdaten_weather_2020-01"
        );
        assert_eq!(file_index_name("luftdaten_weather"), "luftdaten_weather_file_index");
    }

    #[test]
    fn bounds_hold_the_search_circle() {
        let bounds = GeoBounds::around(48.7758, 9.1829, 10.0);
        // 10 km is about 0.09 degrees of latitude and 0.135 of longitude here.
        assert!((bounds.max_lat - 48.7758 - 0.0899).abs() < 0.001);
        assert!((bounds.max_lon - 9.1829 - 0.1366).abs() < 0.002);
        assert!(bounds.contains(9.1829, 48.8600));
        assert!(!bounds.contains(13.40, 52.52));
    }

    #[test]
    fn bounds_span_all_longitudes_near_pole_and_antimeridian() {
        let polar = GeoBounds::around(89.95, 0.0, 20.0);
        assert_eq!((polar.min_lon, polar.max_lon, polar.max_lat), (-180.0, 180.0, 90.0));

        let dateline = GeoBounds::around(0.0, 179.99, 10.0);
        assert_eq!((dateline.min_lon, dateline.max_lon), (-180.0, 180.0));
        assert!(dateline.max_lat < 1.0);
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(validate_name("luftdaten_2020-01").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("x\"; DROP TABLE y").is_err());
    }

    #[test]
    fn extracts_tags() {
        let doc = serde_json::json!({
            "file_date": "2020-01-01",
            "file_id": 219,
            "timestamp": "2020-01-01T00:00:00+00:00",
            "geo_location": [9.1, 48.7],
        });
        let tags = DocumentTags::extract(doc.as_object().unwrap()).unwrap();
        assert_eq!(tags.file_id, 219);
        assert_eq!(tags.file_date.to_string(), "2020-01-01");
        assert_eq!(tags.location, Some((9.1, 48.7)));
    }

    #[test]
    fn rejects_untagged_document() {
        let doc = serde_json::json!({"file_id": 219});
        assert!(DocumentTags::extract(doc.as_object().unwrap()).is_err());
    }

    #[test]
    fn tolerates_missing_location() {
        let doc = serde_json::json!({
            "file_date": "2020-01-01",
            "file_id": 1,
            "geo_location": [null, 48.7],
        });
        let tags = DocumentTags::extract(doc.as_object().unwrap()).unwrap();
        assert_eq!(tags.location, None);
        assert_eq!(tags.timestamp, None);
    }
}
