//! Pagination walker: assembles one chapter by following its "next page"
//! chain, with cycle protection and a hard page cap.

use crate::model::{Chapter, StoryTask};
use crate::scraper::client::{Page, PoliteClient};
use crate::scraper::resolve::{resolve, ResolverConfig, SelectorResult};
use crate::scraper::{slug_from_url, url_key};
use std::collections::HashSet;

/// Walk a chapter starting from an already-fetched and resolved first page.
///
/// Paragraphs accumulate in fetch-traversal order. A next link pointing to a
/// visited URL ends the chapter as complete; hitting `max_pages` or losing a
/// continuation page after retries ends it as partial. Failures are warned to
/// stderr, never silently dropped.
pub fn collect_chapter(
    client: &mut PoliteClient,
    task: &StoryTask,
    first_page: Page,
    first: SelectorResult,
    resolver: &ResolverConfig,
    max_pages: usize,
) -> Chapter {
    let title = first
        .title
        .clone()
        .or_else(|| task.title_hint.clone())
        .unwrap_or_else(|| slug_from_url(&task.url));

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(url_key(&first_page.url));
    // The requested task URL may differ from the final URL after redirects.
    if let Ok(requested) = reqwest::Url::parse(&task.url) {
        visited.insert(url_key(&requested));
    }

    let mut paragraphs = first.paragraphs;
    let mut source_urls = vec![first_page.url.to_string()];
    let mut partial = false;
    let mut next = first.next_url;

    while let Some(url) = next.take() {
        if visited.contains(&url_key(&url)) {
            // Malformed next link pointing backwards: chapter is complete.
            break;
        }
        if source_urls.len() >= max_pages {
            eprintln!(
                "Page cap ({}) reached while assembling '{}'; output will be partial.",
                max_pages, title
            );
            partial = true;
            break;
        }
        let page = match client.get_page(&url) {
            Ok(p) => p,
            Err(e) => {
                eprintln!(
                    "Continuation page failed ({}): {}. Keeping the {} page(s) already fetched.",
                    url,
                    e,
                    source_urls.len()
                );
                partial = true;
                break;
            }
        };
        let final_key = url_key(&page.url);
        if visited.contains(&final_key) {
            // Redirected onto a page already consumed.
            break;
        }
        visited.insert(url_key(&url));
        visited.insert(final_key);
        source_urls.push(page.url.to_string());

        let result = resolve(&page, resolver);
        paragraphs.extend(result.paragraphs);
        next = result.next_url;
    }

    Chapter {
        title,
        paragraphs,
        source_urls,
        partial,
    }
}
