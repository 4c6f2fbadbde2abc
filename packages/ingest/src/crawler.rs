//! Partition and file discovery on the remote archive.

use std::path::{Path, PathBuf};

use sensor_archive_ingest_models::{Partition, SourceFile};
use sensor_archive_scraper::listing::fetch_links;

use crate::{IngestContext, IngestError};

/// Lists the archive's day directories, newest first.
///
/// With `last_days > 0` only that many of the newest partitions are kept.
/// A failed listing is logged and yields no partitions.
pub async fn discover_partitions(ctx: &IngestContext, last_days: usize) -> Vec<Partition> {
    let url = &ctx.settings.archive_url;
    let links = match fetch_links(&ctx.http, url, true).await {
        Ok(links) => links,
        Err(e) => {
            log::error!("Failed to fetch the archive index {url}: {e}");
            return Vec::new();
        }
    };

    let partitions = partitions_from_links(&links, last_days);
    log::info!("{} partitions selected from {url}", partitions.len());
    partitions
}

/// Turns directory links into partitions, newest first.
///
/// Links that are not date directories (`../`, `tools/`) are ignored.
#[must_use]
pub fn partitions_from_links(links: &[String], last_days: usize) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = links
        .iter()
        .filter_map(|link| Partition::from_listing_entry(link))
        .collect();
    partitions.sort_unstable_by(|a, b| b.cmp(a));
    partitions.dedup();

    log::info!("{} directories of tracked days found", partitions.len());

    if last_days > 0 && last_days < partitions.len() {
        log::info!("Only keeping the last {last_days} days");
        partitions.truncate(last_days);
    }
    partitions
}

/// Returns the URL of a partition directory.
#[must_use]
pub fn partition_url(archive_url: &str, partition: Partition) -> String {
    if archive_url.ends_with('/') {
        format!("{archive_url}{partition}/")
    } else {
        format!("{archive_url}/{partition}/")
    }
}

/// Returns where the file listing of a partition is cached.
#[must_use]
pub fn listing_cache_path(cache_dir: &Path, partition: Partition) -> PathBuf {
    cache_dir.join(format!("{partition}.json"))
}

/// Turns the links of a partition page into source files.
///
/// Names that do not follow the `{date}_{type}_{kind}_{id}.{ext}`
/// convention are dropped.
#[must_use]
pub fn source_files_from_links(
    archive_url: &str,
    partition: Partition,
    links: &[String],
) -> Vec<SourceFile> {
    let base = partition_url(archive_url, partition);
    links
        .iter()
        .filter(|href| !href.ends_with('/'))
        .filter_map(|href| {
            let file_name = href.rsplit('/').next().unwrap_or(href);
            let url = if href.contains("://") {
                href.clone()
            } else {
                format!("{base}{file_name}")
            };
            let file = SourceFile::parse(partition, file_name, &url);
            if file.is_none() {
                log::debug!("Dropping malformed listing entry '{href}' of {partition}");
            }
            file
        })
        .collect()
}

/// Reads a cached listing. Returns `None` when nothing is cached yet.
///
/// # Errors
///
/// Returns [`IngestError`] if the cache file exists but cannot be read or
/// parsed.
pub async fn read_listing_cache(path: &Path) -> Result<Option<Vec<SourceFile>>, IngestError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IngestError::io(path)(e)),
    }
}

/// Writes a listing to the cache.
///
/// # Errors
///
/// Returns [`IngestError`] if the cache directory or file cannot be
/// written.
pub async fn write_listing_cache(path: &Path, files: &[SourceFile]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(IngestError::io(parent))?;
    }
    let json = serde_json::to_string_pretty(files)?;
    tokio::fs::write(path, json)
        .await
        .map_err(IngestError::io(path))
}

/// Returns the files of a partition, from the listing cache when present,
/// otherwise from the archive (and then cached).
///
/// The cache is never invalidated; delete the file to force a refetch.
///
/// # Errors
///
/// Returns [`IngestError`] if the listing cannot be fetched or the cache
/// cannot be read or written.
pub async fn partition_files(
    ctx: &IngestContext,
    partition: Partition,
) -> Result<Vec<SourceFile>, IngestError> {
    let cache = listing_cache_path(&ctx.settings.cache_dir(), partition);
    if let Some(files) = read_listing_cache(&cache).await? {
        log::debug!("Using cached listing for {partition} ({} files)", files.len());
        return Ok(files);
    }

    log::info!("Fetching the file list of day {partition}");
    let url = partition_url(&ctx.settings.archive_url, partition);
    let links = fetch_links(&ctx.http, &url, false).await?;
    let files = source_files_from_links(&ctx.settings.archive_url, partition, &links);
    log::info!("{} measurement files found for {partition}", files.len());

    write_listing_cache(&cache, &files).await?;
    Ok(files)
}
