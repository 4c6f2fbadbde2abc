#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the sensor archive binaries.
//!
//! [`init_logger`] installs `pretty_env_logger` behind `indicatif-log-bridge`
//! so log lines do not tear the progress bars, and [`IndicatifProgress`]
//! renders pipeline progress.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use sensor_archive_ingest_models::progress::ProgressCallback;

pub use indicatif::MultiProgress;

/// An `indicatif` bar driven through [`ProgressCallback`].
///
/// Starts as a spinner and turns into a bar once the number of partitions
/// is known.
pub struct IndicatifProgress {
    bar: ProgressBar,
    sized_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Adds a partition-level bar for one job to `multi`.
    #[must_use]
    pub fn job_bar(multi: &MultiProgress, job: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(job.to_string());

        let sized_style = ProgressStyle::with_template(
            "{msg} {wide_bar:.cyan/dim} {pos}/{len} days [{elapsed_precise}, {eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");

        Arc::new(Self { bar, sized_style })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_style(self.sized_style.clone());
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs the global logger and returns the [`MultiProgress`] every bar
/// must be added to.
///
/// Verbosity follows `RUST_LOG`. Calling it twice keeps the first logger.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}
