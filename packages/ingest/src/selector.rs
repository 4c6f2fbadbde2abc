//! Which files of a partition a job accepts.

use std::path::Path;

use sensor_archive_ingest_models::jobs::JobConfig;
use sensor_archive_ingest_models::sensor_id_token;

/// File acceptance rules of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    /// Keep names containing any of these substrings.
    pub file_filters: Vec<String>,
    /// Keep only these sensor ids. Takes precedence over `file_filters`.
    pub sensor_ids: Vec<i64>,
    /// Per-partition cap (0 = unlimited).
    pub max_files: usize,
}

impl FileSelection {
    /// Takes the selection rules from a job.
    #[must_use]
    pub fn from_job(job: &JobConfig) -> Self {
        Self {
            file_filters: job.file_filters.clone(),
            sensor_ids: job.sensor_ids.clone(),
            max_files: job.max_files_per_day,
        }
    }

    /// Returns whether a single file name passes the filters.
    ///
    /// Only `.csv` names are accepted. A sensor-id allowlist, when set,
    /// decides alone; otherwise any matching substring filter accepts the
    /// name.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        if !is_csv(name) {
            return false;
        }
        if !self.sensor_ids.is_empty() {
            return sensor_id_token(name).is_some_and(|id| self.sensor_ids.contains(&id));
        }
        self.file_filters.is_empty() || self.file_filters.iter().any(|f| name.contains(f.as_str()))
    }

    /// Keeps the candidates that pass [`Self::accepts`], in their original
    /// order. The cap is not applied.
    #[must_use]
    pub fn filter<T: AsRef<str>>(&self, candidates: Vec<T>) -> Vec<T> {
        candidates
            .into_iter()
            .filter(|c| self.accepts(c.as_ref()))
            .collect()
    }

    /// Filters the candidates, then keeps at most `max_files` of them.
    #[must_use]
    pub fn select<T: AsRef<str>>(&self, candidates: Vec<T>) -> Vec<T> {
        let mut selected = self.filter(candidates);
        if self.max_files > 0 && selected.len() > self.max_files {
            log::warn!(
                "{} files match, limiting to the first {}",
                selected.len(),
                self.max_files
            );
            selected.truncate(self.max_files);
        }
        selected
    }
}

fn is_csv(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}
