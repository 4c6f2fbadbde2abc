//! Data-driven job definitions.
//!
//! A job describes one parameterized crawl-and-load run: which dataset it
//! fills, which files it accepts, and which phases it runs. Job lists are
//! written in TOML:
//!
//! ```toml
//! [[jobs]]
//! name = "luftdaten_weather"
//! max_files_per_day = 100
//! last_days = 1461
//! file_filters = ["dht22"]
//! ```

use serde::{Deserialize, Serialize};

/// Default number of records buffered before a bulk write.
pub const DEFAULT_BUCKET_SIZE: usize = 100;

/// One parameterized pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Dataset name; prefixes every collection the job writes.
    pub name: String,
    /// Maximum files per partition (0 = unlimited).
    #[serde(default)]
    pub max_files_per_day: usize,
    /// Only process the N most recent partitions (0 = all).
    #[serde(default)]
    pub last_days: usize,
    /// Accept files whose name contains any of these substrings.
    #[serde(default)]
    pub file_filters: Vec<String>,
    /// Accept only files of these sensor ids. Replaces `file_filters` when
    /// non-empty.
    #[serde(default)]
    pub sensor_ids: Vec<i64>,
    /// Drop and recreate every collection the job touches.
    ///
    /// Destructive; defaults to `false` and must be set explicitly.
    #[serde(default)]
    pub truncate: bool,
    /// Records buffered before a bulk write.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
    /// Run the mirror (download) phase.
    #[serde(default = "default_true")]
    pub download: bool,
    /// Run the index (load) phase.
    #[serde(default = "default_true")]
    pub index: bool,
}

const fn default_bucket_size() -> usize {
    DEFAULT_BUCKET_SIZE
}

const fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Creates a job with default settings for the given dataset.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_files_per_day: 0,
            last_days: 0,
            file_filters: Vec::new(),
            sensor_ids: Vec::new(),
            truncate: false,
            bucket_size: DEFAULT_BUCKET_SIZE,
            download: true,
            index: true,
        }
    }
}

/// A list of jobs as loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobList {
    /// Jobs in execution order.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl JobList {
    /// Parses a TOML job list.
    ///
    /// # Errors
    ///
    /// Returns a [`toml::de::Error`] if the document is malformed or a job
    /// is missing its `name`.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Returns the job with the given dataset name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
