#![allow(clippy::module_name_repetitions)]

//! Menu-driven front end used when the binary runs without a subcommand.

use dialoguer::{Confirm, Input, MultiSelect, Select};
use sensor_archive_cli_utils::{IndicatifProgress, MultiProgress};
use sensor_archive_database::search::{GeoQuery, search_near};
use sensor_archive_ingest_models::jobs::{JobConfig, JobList};
use sensor_archive_ingest_models::progress::ProgressCallback as _;

use crate::reader::list_local_partitions;
use crate::summary::{dataset_status, print_jobs, print_report, print_search, print_status};
use crate::{IngestContext, run_job};

enum MenuAction {
    RunJobs,
    ListJobs,
    Status,
    Search,
}

impl MenuAction {
    const ALL: &[Self] = &[Self::RunJobs, Self::ListJobs, Self::Status, Self::Search];

    const fn label(&self) -> &'static str {
        match self {
            Self::RunJobs => "Run jobs (download + index)",
            Self::ListJobs => "List jobs",
            Self::Status => "Show import status",
            Self::Search => "Search near a location",
        }
    }
}

/// Shows the main menu and runs the chosen action.
///
/// # Errors
///
/// Returns an error if a prompt fails or the chosen action fails.
pub async fn run(
    ctx: &IngestContext,
    jobs: &JobList,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = MenuAction::ALL.iter().map(MenuAction::label).collect();
    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match MenuAction::ALL[idx] {
        MenuAction::RunJobs => run_jobs(ctx, jobs, multi).await?,
        MenuAction::ListJobs => print_jobs(jobs),
        MenuAction::Status => {
            let dataset = pick_dataset(jobs)?;
            let partitions = list_local_partitions(ctx.settings.mirror_dir())?;
            print_status(&dataset_status(ctx.store.as_ref(), &dataset, &partitions)?);
        }
        MenuAction::Search => search(ctx, jobs)?,
    }

    Ok(())
}

/// Answers to the run prompts, applied to every selected job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunChoices {
    download: bool,
    index: bool,
    truncate: bool,
}

impl RunChoices {
    /// Returns `job` with the answers applied.
    ///
    /// Truncation follows the confirmed answer alone; a `truncate = true`
    /// in the job list never drops collections from the menu.
    fn apply(self, job: &JobConfig) -> JobConfig {
        if job.truncate && !self.truncate {
            log::info!("Not truncating {}: truncation was not confirmed", job.name);
        }
        JobConfig {
            download: self.download,
            index: self.index,
            truncate: self.truncate,
            ..job.clone()
        }
    }
}

async fn run_jobs(
    ctx: &IngestContext,
    jobs: &JobList,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = jobs.jobs.iter().map(|j| j.name.as_str()).collect();
    let selected = MultiSelect::new()
        .with_prompt("Select jobs (space=toggle, a=all, enter=confirm)")
        .items(&labels)
        .interact()?;
    if selected.is_empty() {
        println!("No jobs selected.");
        return Ok(());
    }

    let download = Confirm::new()
        .with_prompt("Download new files?")
        .default(true)
        .interact()?;
    let index = Confirm::new()
        .with_prompt("Index mirrored files?")
        .default(true)
        .interact()?;

    let mut truncate = false;
    if index {
        truncate = Confirm::new()
            .with_prompt("Truncate the collections of the selected jobs?")
            .default(false)
            .interact()?;
        if truncate {
            truncate = Confirm::new()
                .with_prompt("This deletes every indexed document and import mark of these jobs. Continue?")
                .default(false)
                .interact()?;
        }
    }

    let choices = RunChoices {
        download,
        index,
        truncate,
    };

    for &i in &selected {
        let job = choices.apply(&jobs.jobs[i]);

        let progress = IndicatifProgress::job_bar(multi, &job.name);
        match run_job(ctx, &job, &progress).await {
            Ok(report) => {
                progress.finish_and_clear();
                print_report(&report);
                if report.cancelled {
                    break;
                }
            }
            Err(e) => {
                progress.finish_and_clear();
                log::error!("Job {} failed: {e}", job.name);
            }
        }
    }

    Ok(())
}

fn pick_dataset(jobs: &JobList) -> Result<String, Box<dyn std::error::Error>> {
    let labels: Vec<&str> = jobs.jobs.iter().map(|j| j.name.as_str()).collect();
    let idx = Select::new()
        .with_prompt("Dataset")
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(labels[idx].to_string())
}

fn search(ctx: &IngestContext, jobs: &JobList) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = pick_dataset(jobs)?;
    let latitude: f64 = Input::new()
        .with_prompt("Latitude")
        .default(48.7758)
        .interact_text()?;
    let longitude: f64 = Input::new()
        .with_prompt("Longitude")
        .default(9.1829)
        .interact_text()?;
    let distance_km: f64 = Input::new()
        .with_prompt("Distance (km)")
        .default(5.0)
        .interact_text()?;
    let limit: usize = Input::new()
        .with_prompt("Results per page")
        .default(10)
        .interact_text()?;

    let mut query = GeoQuery {
        latitude,
        longitude,
        distance_km,
        limit,
        page: 0,
    };

    loop {
        let page = search_near(ctx.store.as_ref(), &dataset, &query)?;
        print_search(&page, query.page);
        if query.page + 1 >= page.pages {
            break;
        }
        let next = Confirm::new()
            .with_prompt("Show next page?")
            .default(true)
            .interact()?;
        if !next {
            break;
        }
        query.page += 1;
    }

    Ok(())
}
