//! Site-agnostic scraping engine: polite fetching, heuristic content
//! resolution, pagination and index walking, and run orchestration.

mod chapter;
mod client;
mod error;
mod index;
mod orchestrator;
mod resolve;

#[cfg(test)]
pub(crate) mod testutil;

pub use chapter::collect_chapter;
pub use client::{ClientSettings, Page, PoliteClient};
pub use error::ScraperError;
pub use index::IndexWalker;
pub use orchestrator::{process, Mode, RunOptions, SkipFn, TaskOutcome, TaskReport};
pub use resolve::{resolve, resolve_as_index, PageKind, ResolverConfig, SelectorResult};

use reqwest::Url;

/// Stable identity for visited-set and dedup checks: fragment stripped,
/// trailing slash removed.
pub(crate) fn url_key(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    let s = u.to_string();
    match s.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}

/// Filesystem-safe slug derived from a URL: the last non-empty path segment,
/// else the host. Used as the skip-if-exists identity and default file name.
pub fn slug_from_url(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return sanitize_slug(url),
    };
    let segment = parsed
        .path_segments()
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
        .map(|s| {
            // "chapter-one.html" names the same story as "chapter-one".
            match s.rsplit_once('.') {
                Some((stem, ext))
                    if !stem.is_empty() && matches!(ext, "html" | "htm" | "php" | "asp" | "aspx") =>
                {
                    stem.to_string()
                }
                _ => s.to_string(),
            }
        });
    let base = segment
        .or_else(|| parsed.host_str().map(String::from))
        .unwrap_or_else(|| "story".to_string());
    sanitize_slug(&base)
}

/// Sanitize arbitrary text to a slug: lowercase alphanumerics, dash-separated.
pub fn sanitize_slug(text: &str) -> String {
    let mut s = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    // Collapse multiple dashes and trim
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "story".to_string();
    }
    s
}
