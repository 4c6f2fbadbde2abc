#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Document store for sensor measurements and import progress.
//!
//! Collections come in two kinds: monthly data collections holding one
//! document per measurement row, and one append-only file index per
//! dataset holding [`ImportMark`](sensor_archive_ingest_models::ImportMark)s.
//!
//! [`DocumentStore`](store::DocumentStore) is the seam the pipeline talks to.
//! [`duck::DuckDbStore`] persists collections as `DuckDB` tables;
//! [`memory::MemoryStore`] keeps them in process.

pub mod duck;
pub mod memory;
pub mod paths;
pub mod search;
pub mod store;

pub use store::{CollectionKind, DocumentStore, GeoBounds};

/// Errors that can occur during document store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (creating the database directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The collection name cannot be used as a table identifier.
    #[error("Invalid collection name: {name}")]
    InvalidCollectionName {
        /// The rejected name.
        name: String,
    },

    /// The collection does not exist.
    #[error("Collection not found: {name}")]
    MissingCollection {
        /// The missing collection.
        name: String,
    },

    /// The operation does not apply to this kind of collection.
    #[error("Collection {name} is not a {expected} collection")]
    WrongKind {
        /// The collection that was addressed.
        name: String,
        /// The kind the operation needs.
        expected: CollectionKind,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A thread panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,
}
