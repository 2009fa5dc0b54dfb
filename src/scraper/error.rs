//! Shared error type for the scraping engine.

use thiserror::Error;

/// Shared scraper error for URL validation, HTTP fetching, and discovery.
///
/// Fetch variants record how many HTTP attempts were spent before giving up;
/// non-retryable failures (4xx other than 429) report a single attempt.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Failed to create HTTP client: {source}")]
    ClientBuild { source: reqwest::Error },

    #[error("HTTP {status} when fetching {url} (after {attempts} attempt(s))")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: u32,
    },

    #[error("Network error: could not reach {url} after {attempts} attempt(s): {source}")]
    Network {
        url: String,
        attempts: u32,
        source: reqwest::Error,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    /// No heuristic matched the page: neither story text nor an index listing.
    #[error("No readable content found at {url}")]
    NoContent { url: String },

    #[error("Index at {url} is nested deeper than the recursion limit; not followed")]
    IndexDepthExceeded { url: String },

    #[error("No stories could be retrieved (all failed or empty).")]
    NoStoriesRetrieved,
}

impl ScraperError {
    /// True for failures that exhausted the retry budget rather than being
    /// rejected outright (used by callers to word warnings).
    pub fn is_transient(&self) -> bool {
        match self {
            ScraperError::Network { .. } => true,
            ScraperError::HttpStatus { status, .. } => {
                *status == 429 || (500..600).contains(&(*status as u32))
            }
            _ => false,
        }
    }
}
