//! Geo-distance search over a dataset's monthly collections.
//!
//! Returns the documents within a radius of a point, newest first, one page
//! at a time.

use geo::{Distance as _, Haversine, Point};
use sensor_archive_ingest_models::{Document, FIELD_GEO_LOCATION, FIELD_TIMESTAMP};
use serde::Serialize;

use crate::DbError;
use crate::store::{DocumentStore, GeoBounds, file_index_name};

/// Parameters of a radius search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    /// Latitude of the search center (WGS84).
    pub latitude: f64,
    /// Longitude of the search center (WGS84).
    pub longitude: f64,
    /// Search radius in kilometres.
    pub distance_km: f64,
    /// Page size.
    pub limit: usize,
    /// Zero-indexed page number.
    pub page: usize,
}

/// One document matched by a [`GeoQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoHit {
    /// Collection the document was found in.
    pub collection: String,
    /// Distance from the search center in kilometres.
    pub distance_km: f64,
    /// The matched document.
    pub document: Document,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoPage {
    /// Total number of matching documents.
    pub total: usize,
    /// Number of pages at the requested page size.
    pub pages: usize,
    /// Hits on the requested page.
    pub hits: Vec<GeoHit>,
}

/// Returns the data collections belonging to `dataset`, skipping its file
/// index.
///
/// # Errors
///
/// Returns [`DbError`] if the collection catalog cannot be read.
pub fn dataset_collections(store: &dyn DocumentStore, dataset: &str) -> Result<Vec<String>, DbError> {
    let prefix = format!("{dataset}_");
    let index = file_index_name(dataset);
    Ok(store
        .list_collections()?
        .into_iter()
        .filter(|name| name.starts_with(&prefix) && *name != index)
        .filter(|name| {
            // Only `{dataset}_{YYYY-MM}`; other datasets may share a prefix.
            let suffix = &name[prefix.len()..];
            suffix.len() == 7 && chrono::NaiveDate::parse_from_str(&format!("{suffix}-01"), "%Y-%m-%d").is_ok()
        })
        .collect())
}

fn location_of(document: &Document) -> Option<Point<f64>> {
    let pair = document.get(FIELD_GEO_LOCATION)?.as_array()?;
    match pair.as_slice() {
        [lon, lat] => Some(Point::new(lon.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

fn timestamp_of(document: &Document) -> &str {
    document
        .get(FIELD_TIMESTAMP)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
}

/// Searches every monthly collection of `dataset` for documents within
/// `query.distance_km` of the query point.
///
/// The store narrows each collection to the bounding box of the search
/// circle; only those rows are measured exactly.
///
/// Hits are sorted by timestamp, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if a collection cannot be scanned.
pub fn search_near(
    store: &dyn DocumentStore,
    dataset: &str,
    query: &GeoQuery,
) -> Result<GeoPage, DbError> {
    let center = Point::new(query.longitude, query.latitude);
    let radius_m = query.distance_km * 1_000.0;
    let bounds = GeoBounds::around(query.latitude, query.longitude, query.distance_km);
    let mut matches: Vec<GeoHit> = Vec::new();

    for collection in dataset_collections(store, dataset)? {
        for document in store.located_documents_within(&collection, &bounds)? {
            let Some(point) = location_of(&document) else {
                continue;
            };
            let distance_m = Haversine.distance(center, point);
            if distance_m <= radius_m {
                matches.push(GeoHit {
                    collection: collection.clone(),
                    distance_km: distance_m / 1_000.0,
                    document,
                });
            }
        }
    }

    matches.sort_by(|a, b| timestamp_of(&b.document).cmp(timestamp_of(&a.document)));

    let total = matches.len();
    let limit = query.limit.max(1);
    let pages = total.div_ceil(limit);
    let hits = matches
        .into_iter()
        .skip(query.page.saturating_mul(limit))
        .take(limit)
        .collect();

    log::info!("{total} results ({pages} pages) have been found");

    Ok(GeoPage { total, pages, hits })
}
