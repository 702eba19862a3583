//! Shared HTTP plumbing for the page scrapers.

use std::time::Duration;

use careerkb_shared::{CareerKbError, HttpConfig, Result, ScrapeFailure};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// Build a reqwest client from the `[http]` config section.
pub(crate) fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| CareerKbError::config(format!("failed to build HTTP client: {e}")))
}

/// Parse and check that `raw` is an absolute http(s) URL with a host.
pub(crate) fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CareerKbError::scrape(raw, ScrapeFailure::InvalidUrl, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CareerKbError::scrape(
            raw,
            ScrapeFailure::InvalidUrl,
            "expected an http(s) URL with a host",
        ));
    }
    Ok(url)
}

/// A fetched HTML page.
pub(crate) struct Page {
    /// URL after redirects.
    pub final_url: Url,
    pub body: String,
}

/// GET `url`. Auth-gated statuses map to [`ScrapeFailure::PrivateProfile`],
/// everything else that is not a success to [`ScrapeFailure::Network`].
pub(crate) async fn fetch_page(client: &Client, url: &Url) -> Result<Page> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| CareerKbError::scrape(url.as_str(), ScrapeFailure::Network, e.to_string()))?;

    let status = response.status();
    // LinkedIn answers unauthenticated scrapers with a non-standard 999.
    let gated = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || status.as_u16() == 999;
    if gated {
        return Err(CareerKbError::scrape(
            url.as_str(),
            ScrapeFailure::PrivateProfile,
            format!("HTTP {status}: page requires login"),
        ));
    }
    if !status.is_success() {
        return Err(CareerKbError::scrape(
            url.as_str(),
            ScrapeFailure::Network,
            format!("HTTP {status}"),
        ));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(CareerKbError::scrape(
                url.as_str(),
                ScrapeFailure::Network,
                format!("response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"),
            ));
        }
    }

    let final_url = response.url().clone();
    let body = response.text().await.map_err(|e| {
        CareerKbError::scrape(
            url.as_str(),
            ScrapeFailure::Network,
            format!("failed to read body: {e}"),
        )
    })?;
    debug!(url = %final_url, bytes = body.len(), "fetched page");
    Ok(Page { final_url, body })
}

/// Collapse the whitespace of an element's text content.
pub(crate) fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation() {
        assert!(parse_url("https://www.linkedin.com/in/jane").is_ok());
        for bad in ["not a url", "ftp://example.com/x", "mailto:jane@example.com"] {
            let err = parse_url(bad).unwrap_err();
            assert!(
                matches!(err, CareerKbError::Scrape { kind: ScrapeFailure::InvalidUrl, .. }),
                "{bad}"
            );
        }
    }
}
