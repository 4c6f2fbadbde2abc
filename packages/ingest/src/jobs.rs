//! Job list loading.
//!
//! The default list is embedded at compile time via [`include_str!`]; a
//! different file can be passed on the command line.

use std::path::Path;

use sensor_archive_ingest_models::jobs::{JobList, JobConfig};

use crate::IngestError;

/// The embedded default job list.
const DEFAULT_JOBS: &str = include_str!("../jobs/default.toml");

/// Returns the embedded default job list.
///
/// # Errors
///
/// Returns [`IngestError::Jobs`] if the embedded list is malformed.
pub fn default_jobs() -> Result<JobList, IngestError> {
    Ok(JobList::from_toml(DEFAULT_JOBS)?)
}

/// Loads the job list from `path`, or the embedded default when `None`.
///
/// # Errors
///
/// Returns [`IngestError`] if the file cannot be read or parsed.
pub fn load_jobs(path: Option<&Path>) -> Result<JobList, IngestError> {
    let Some(path) = path else {
        return default_jobs();
    };
    let source = std::fs::read_to_string(path).map_err(IngestError::io(path))?;
    Ok(JobList::from_toml(&source)?)
}

/// Picks jobs by a comma-separated list of names. `None` selects all.
///
/// # Errors
///
/// Returns [`IngestError::UnknownJob`] for the first name not in the list.
pub fn select_jobs(list: &JobList, names: Option<&str>) -> Result<Vec<JobConfig>, IngestError> {
    let Some(names) = names else {
        return Ok(list.jobs.clone());
    };

    names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|name| {
            list.find(name)
                .cloned()
                .ok_or_else(|| IngestError::UnknownJob(name.to_string()))
        })
        .collect()
}
