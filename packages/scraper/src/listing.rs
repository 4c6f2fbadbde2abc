//! Link extraction from auto-index directory pages.

use scraper::{Html, Selector};

use crate::ScrapeError;

/// Returns the `href` of every anchor in `html`, in document order.
///
/// With `only_directories` set, only links ending in `/` are kept.
///
/// # Errors
///
/// Returns [`ScrapeError::Parse`] if the anchor selector cannot be built.
pub fn extract_links(html: &str, only_directories: bool) -> Result<Vec<String>, ScrapeError> {
    let selector = Selector::parse("a[href]")
        .map_err(|e| ScrapeError::Parse(format!("invalid CSS selector 'a[href]': {e}")))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| !only_directories || href.ends_with('/'))
        .map(str::to_string)
        .collect())
}

/// Fetches `url` and returns the links found on the page.
///
/// The body is decoded with the charset from the `Content-Type` header,
/// falling back to UTF-8.
///
/// # Errors
///
/// Returns [`ScrapeError`] if the request fails, the server answers with a
/// non-success status, or the page cannot be parsed.
pub async fn fetch_links(
    client: &reqwest::Client,
    url: &str,
    only_directories: bool,
) -> Result<Vec<String>, ScrapeError> {
    log::debug!("Fetching listing {url}");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ScrapeError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let body = response.text().await?;
    let links = extract_links(&body, only_directories)?;
    log::debug!("{} links found on {url}", links.len());
    Ok(links)
}
