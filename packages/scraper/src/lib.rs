#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP access to the sensor archive.
//!
//! The archive publishes plain auto-index HTML pages: the root lists one
//! directory per day, each day lists one CSV file per sensor. [`listing`]
//! turns those pages into link lists and [`download`] streams single files
//! to disk.
//!
//! This crate knows nothing about partitions, jobs or the document store.

pub mod download;
pub mod listing;

/// Default `User-Agent` sent with every archive request.
pub const USER_AGENT: &str = concat!("sensor-archive/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while talking to the archive.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Writing a downloaded file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Parsing the response body failed.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Builds the HTTP client shared by listing and download requests.
///
/// # Errors
///
/// Returns [`ScrapeError::Http`] if the TLS backend cannot be initialised.
pub fn build_client() -> Result<reqwest::Client, ScrapeError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(ScrapeError::Http)
}
