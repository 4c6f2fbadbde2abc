#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental crawl-and-load pipeline for the sensor CSV archive.
//!
//! A job runs in two passes. The download pass walks the remote archive
//! newest day first and mirrors the selected CSV files locally. The index
//! pass walks the local mirror, resumes each day after the last committed
//! file, and loads the rows into the document store in buckets, writing an
//! import mark for every file once its rows are stored.

pub mod bucket;
pub mod cleaner;
pub mod context;
pub mod crawler;
pub mod interactive;
pub mod jobs;
pub mod mirror;
pub mod partition_index;
pub mod pipeline;
pub mod reader;
pub mod selector;
pub mod summary;
pub mod tracker;

use sensor_archive_database::DbError;
use sensor_archive_scraper::ScrapeError;

pub use context::{IngestContext, Settings};
pub use pipeline::{JobReport, run_job};

/// Errors that can occur while running an ingest job.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Document store error.
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// Archive request error.
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// A bucket could not be committed.
    #[error(transparent)]
    Flush(#[from] bucket::FlushError),

    /// Local file system error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A mirrored CSV file could not be read.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// File being read.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Listing cache (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A job list could not be parsed.
    #[error("Invalid job list: {0}")]
    Jobs(#[from] toml::de::Error),

    /// No job with that name exists.
    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

impl IngestError {
    pub(crate) fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
