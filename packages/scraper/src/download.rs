//! Streaming file download.

use std::path::Path;

use futures::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

use crate::ScrapeError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ScrapeError + '_ {
    move |source| ScrapeError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Downloads `url` to `dest`, writing the body chunk by chunk.
///
/// Parent directories are created as needed. Returns the number of bytes
/// written. If the transfer fails midway the partial file is removed, but
/// the write is not atomic: a crash can still leave a truncated file behind.
///
/// # Errors
///
/// Returns [`ScrapeError`] if the request fails, the server answers with a
/// non-success status, or the file cannot be written.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, ScrapeError> {
    log::debug!("Downloading {url} -> {}", dest.display());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_error(parent))?;
    }

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ScrapeError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let file = tokio::fs::File::create(dest)
        .await
        .map_err(io_error(dest))?;

    match write_body(response, file, dest).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(remove) = tokio::fs::remove_file(dest).await {
                log::warn!("Failed to remove partial download {}: {remove}", dest.display());
            }
            Err(e)
        }
    }
}

async fn write_body(
    response: reqwest::Response,
    mut file: tokio::fs::File,
    dest: &Path,
) -> Result<u64, ScrapeError> {
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_error(dest))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_error(dest))?;
    Ok(written)
}
