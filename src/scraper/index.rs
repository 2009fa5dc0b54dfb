//! Index walker: lazily enumerates story tasks from a listing page, following
//! the listing's own pagination.

use crate::model::StoryTask;
use crate::scraper::client::{Page, PoliteClient};
use crate::scraper::resolve::{resolve_as_index, ResolverConfig, SelectorResult};
use crate::scraper::url_key;
use reqwest::Url;
use std::collections::{HashSet, VecDeque};

/// Lazy, finite, non-restartable enumeration of child stories.
///
/// Seeds from the starting page's child links and fetches the next listing
/// page only once the pending queue drains. Children are deduplicated by
/// absolute URL across all listing pages. Story content is never fetched
/// here; each yielded [StoryTask] is a starting URL plus the anchor text as a
/// title hint.
pub struct IndexWalker<'a> {
    client: &'a mut PoliteClient,
    resolver: ResolverConfig,
    pending: VecDeque<StoryTask>,
    next_page: Option<Url>,
    seen_children: HashSet<String>,
    visited_pages: HashSet<String>,
    pages_left: usize,
}

impl<'a> IndexWalker<'a> {
    /// Start walking from an already-fetched and resolved listing page.
    /// `max_index_pages` bounds the total listing pages consumed, including
    /// the first.
    pub fn new(
        client: &'a mut PoliteClient,
        first_page: &Page,
        first: &SelectorResult,
        resolver: ResolverConfig,
        max_index_pages: usize,
    ) -> Self {
        let mut walker = Self {
            client,
            resolver,
            pending: VecDeque::new(),
            next_page: first.next_url.clone(),
            seen_children: HashSet::new(),
            visited_pages: HashSet::new(),
            pages_left: max_index_pages.saturating_sub(1),
        };
        walker.visited_pages.insert(url_key(&first_page.url));
        walker.absorb(&first.child_links);
        walker
    }

    fn absorb(&mut self, links: &[(String, Url)]) {
        for (text, url) in links {
            if self.seen_children.insert(url_key(url)) {
                self.pending
                    .push_back(StoryTask::with_hint(url.to_string(), text.clone()));
            }
        }
    }
}

impl Iterator for IndexWalker<'_> {
    type Item = StoryTask;

    fn next(&mut self) -> Option<StoryTask> {
        loop {
            if let Some(task) = self.pending.pop_front() {
                return Some(task);
            }
            let url = self.next_page.take()?;
            if self.pages_left == 0 {
                return None;
            }
            self.pages_left -= 1;
            if !self.visited_pages.insert(url_key(&url)) {
                // Listing pagination looped back on itself.
                return None;
            }
            let page = match self.client.get_page(&url) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Index page failed ({}): {}. Enumeration stops here.", url, e);
                    return None;
                }
            };
            // Scoped to listing pages: no chapter-content precedence and no
            // child-count classification gate, so short tail pages still count.
            let result = resolve_as_index(&page, &self.resolver);
            self.absorb(&result.child_links);
            self.next_page = result.next_url;
        }
    }
}
