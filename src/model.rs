//! Canonical data model for assembled stories.
//!
//! All walkers produce these shapes; the EPUB and single-file writers consume
//! them as the single source of truth.

use serde::{Deserialize, Serialize};

/// One fully assembled story: the renderer input.
///
/// `paragraphs` is the concatenation of every fetched page's text blocks in
/// fetch-traversal order and is never reordered. `source_urls` is the ordered
/// chain of page URLs visited to assemble the story, without duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub paragraphs: Vec<String>,
    #[serde(rename = "sourceUrls")]
    pub source_urls: Vec<String>,
    /// True when a continuation page failed permanently or the page cap was
    /// hit: the content is usable but incomplete.
    #[serde(default)]
    pub partial: bool,
}

/// One unit of work: a story to download.
///
/// `title_hint` carries the index anchor text, used as a title fallback when
/// the story page itself yields none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryTask {
    pub url: String,
    #[serde(rename = "titleHint", skip_serializing_if = "Option::is_none")]
    pub title_hint: Option<String>,
}

impl StoryTask {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title_hint: None,
        }
    }

    pub fn with_hint(url: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title_hint: Some(hint.into()),
        }
    }
}

/// Per-run outcome counters, printed as the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub saved: u32,
    pub partial: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl RunSummary {
    /// Total number of stories the run attempted or skipped.
    pub fn total(&self) -> u32 {
        self.saved + self.partial + self.skipped + self.failed
    }
}
