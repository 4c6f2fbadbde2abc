//! Run-wide settings and shared handles.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sensor_archive_database::DocumentStore;
use sensor_archive_database::duck::DuckDbStore;
use sensor_archive_database::paths::db_path_from_env;

use crate::IngestError;

/// Environment variable overriding the archive base URL.
pub const ARCHIVE_URL_ENV: &str = "SENSOR_ARCHIVE_URL";
/// Archive base URL used when [`ARCHIVE_URL_ENV`] is not set.
pub const DEFAULT_ARCHIVE_URL: &str = "http://archive.luftdaten.info/";

/// Environment variable overriding the local data directory.
pub const DATA_DIR_ENV: &str = "SENSOR_ARCHIVE_DATA_DIR";
/// Data directory used when [`DATA_DIR_ENV`] is not set.
pub const DEFAULT_DATA_DIR: &str = "data/luftdaten";

/// Environment variable overriding the number of parallel downloads.
pub const DOWNLOAD_CONCURRENCY_ENV: &str = "SENSOR_ARCHIVE_DOWNLOAD_CONCURRENCY";

/// Field delimiter of the published CSV files.
pub const DEFAULT_CSV_DELIMITER: u8 = b';';

const LISTING_CACHE_DIR: &str = ".listings";

/// Where to crawl from and where to keep local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL of the archive; always ends with `/`.
    pub archive_url: String,
    /// Root of the local mirror. Holds one directory per partition.
    pub data_dir: PathBuf,
    /// Field delimiter of mirrored CSV files.
    pub csv_delimiter: u8,
    /// Parallel downloads within one partition.
    pub download_concurrency: usize,
}

impl Settings {
    /// Creates settings for the given archive and data directory.
    #[must_use]
    pub fn new(archive_url: &str, data_dir: impl Into<PathBuf>) -> Self {
        let mut archive_url = archive_url.to_string();
        if !archive_url.ends_with('/') {
            archive_url.push('/');
        }

        Self {
            archive_url,
            data_dir: data_dir.into(),
            csv_delimiter: DEFAULT_CSV_DELIMITER,
            download_concurrency: 1,
        }
    }

    /// Reads settings from the environment, falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let archive_url =
            std::env::var(ARCHIVE_URL_ENV).unwrap_or_else(|_| DEFAULT_ARCHIVE_URL.to_string());
        let data_dir = std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());

        let mut settings = Self::new(&archive_url, data_dir);
        if let Some(n) = std::env::var(DOWNLOAD_CONCURRENCY_ENV)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            settings.download_concurrency = n.max(1);
        }
        settings
    }

    /// Root of the local mirror.
    #[must_use]
    pub fn mirror_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding one cached file listing per partition.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join(LISTING_CACHE_DIR)
    }
}

/// Handles shared by every pipeline component.
///
/// Built once at startup and passed by reference.
pub struct IngestContext {
    /// HTTP client for listings and downloads.
    pub http: reqwest::Client,
    /// Target document store.
    pub store: Arc<dyn DocumentStore>,
    /// Locations and tuning.
    pub settings: Settings,
    cancelled: Arc<AtomicBool>,
}

impl IngestContext {
    /// Creates a new context.
    #[must_use]
    pub fn new(http: reqwest::Client, store: Arc<dyn DocumentStore>, settings: Settings) -> Self {
        Self {
            http,
            store,
            settings,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a context from the environment: opens the `DuckDB` store at
    /// `SENSOR_ARCHIVE_DB` and checks that it answers.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the store cannot be opened or queried, or
    /// the HTTP client cannot be built.
    pub fn from_env() -> Result<Self, IngestError> {
        let path = db_path_from_env();
        let store = DuckDbStore::open(&path)?;
        store.ping()?;
        log::info!("Document store: {}", path.display());

        let http = sensor_archive_scraper::build_client()?;
        Ok(Self::new(http, Arc::new(store), Settings::from_env()))
    }

    /// Returns the flag that stops the run once set.
    ///
    /// The pipeline checks it between files, never while a bucket is being
    /// written.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Asks the running job to stop at the next file boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Sets the cancel flag on the first Ctrl-C. A second Ctrl-C exits
    /// immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let flag = self.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            log::warn!("Interrupted, stopping at the next file boundary (Ctrl-C again to abort)");
            flag.store(true, Ordering::SeqCst);

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
