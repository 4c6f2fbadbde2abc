#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the sensor archive pipeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sensor_archive_cli_utils::{IndicatifProgress, init_logger};
use sensor_archive_database::search::{GeoQuery, search_near};
use sensor_archive_ingest::jobs::{load_jobs, select_jobs};
use sensor_archive_ingest::reader::list_local_partitions;
use sensor_archive_ingest::summary::{
    dataset_status, print_jobs, print_report, print_search, print_status,
};
use sensor_archive_ingest::{IngestContext, run_job};
use sensor_archive_ingest_models::progress::ProgressCallback as _;

#[derive(Parser)]
#[command(name = "sensor_archive_ingest", about = "Sensor archive crawl-and-load tool")]
struct Cli {
    /// Job list to use instead of the built-in one
    #[arg(long, global = true)]
    jobs: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the archive and load it into the document store
    Run {
        /// Comma-separated job names (default: all jobs, in order)
        #[arg(long)]
        job: Option<String>,
        /// Drop and recreate every collection the jobs touch
        #[arg(long)]
        truncate: bool,
        /// Skip the download pass
        #[arg(long)]
        no_download: bool,
        /// Skip the index pass
        #[arg(long)]
        no_index: bool,
        /// Override the bucket size of every job
        #[arg(long)]
        bucket_size: Option<usize>,
    },
    /// List the configured jobs
    Jobs,
    /// Show the import state of a dataset
    Status {
        /// Dataset (job) name
        dataset: String,
    },
    /// Find documents of a dataset near a location, newest first
    Search {
        /// Dataset (job) name
        dataset: String,
        /// Latitude of the center
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Longitude of the center
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Search radius in kilometres
        #[arg(long, default_value = "5")]
        distance_km: f64,
        /// Results per page
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Zero-indexed page
        #[arg(long, default_value = "0")]
        page: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();
    let jobs = load_jobs(cli.jobs.as_deref())?;

    if let Some(Commands::Jobs) = cli.command {
        print_jobs(&jobs);
        return Ok(());
    }

    let ctx = IngestContext::from_env()?;

    let Some(command) = cli.command else {
        ctx.cancel_on_ctrl_c();
        return sensor_archive_ingest::interactive::run(&ctx, &jobs, &multi).await;
    };

    match command {
        Commands::Run {
            job,
            truncate,
            no_download,
            no_index,
            bucket_size,
        } => {
            ctx.cancel_on_ctrl_c();
            let selected = select_jobs(&jobs, job.as_deref())?;
            log::info!(
                "Running {} job(s): {}",
                selected.len(),
                selected
                    .iter()
                    .map(|j| j.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            for mut job in selected {
                job.truncate = job.truncate || truncate;
                job.download = job.download && !no_download;
                job.index = job.index && !no_index;
                if let Some(size) = bucket_size {
                    job.bucket_size = size;
                }

                let progress = IndicatifProgress::job_bar(&multi, &job.name);
                let result = run_job(&ctx, &job, &progress).await;
                progress.finish_and_clear();

                match result {
                    Ok(report) => {
                        print_report(&report);
                        if report.cancelled {
                            break;
                        }
                    }
                    Err(e) => log::error!("Job {} failed: {e}", job.name),
                }
            }
        }
        Commands::Status { dataset } => {
            let partitions = list_local_partitions(ctx.settings.mirror_dir())?;
            print_status(&dataset_status(ctx.store.as_ref(), &dataset, &partitions)?);
        }
        Commands::Search {
            dataset,
            lat,
            lon,
            distance_km,
            limit,
            page,
        } => {
            let query = GeoQuery {
                latitude: lat,
                longitude: lon,
                distance_km,
                limit,
                page,
            };
            let results = search_near(ctx.store.as_ref(), &dataset, &query)?;
            print_search(&results, page);
        }
        Commands::Jobs => print_jobs(&jobs),
    }

    Ok(())
}
