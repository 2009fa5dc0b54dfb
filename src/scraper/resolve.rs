//! Heuristic selector resolution: locates the title, narrative text, "next
//! page" link, and child story links in arbitrary story-site markup.
//!
//! Heuristics are tried in priority order and the first non-trivial match
//! wins; this tolerates markup variance across unrelated sites without
//! per-site configuration. Resolution is total: a page with no recognizable
//! content yields an empty result, not an error.

use crate::scraper::client::Page;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};

/// Tunable thresholds for heuristic matching.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum valid paragraphs for a body heuristic to count as a match.
    pub min_paragraphs: usize,
    /// Minimum characters per paragraph after whitespace normalization.
    pub min_paragraph_chars: usize,
    /// Minimum child links for a page to classify as an index.
    pub min_index_children: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_paragraphs: 2,
            min_paragraph_chars: 12,
            min_index_children: 3,
        }
    }
}

/// How a page was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Narrative text was found: `paragraphs` holds it, `next_url` (if any)
    /// continues the same chapter.
    Chapter,
    /// A listing of stories: `child_links` holds them, `next_url` (if any)
    /// continues the listing itself.
    Index,
    /// Neither heuristic family matched.
    Empty,
}

/// Best-effort resolution outcome for one page.
///
/// `child_links` is meaningful only for `Index` pages; chapter-content
/// precedence guarantees it is empty for `Chapter` pages even when the markup
/// carries index-like sidebars. Both `next_url` and `child_links` may be
/// absent (terminal page, or leaf story without pagination).
#[derive(Debug, Clone)]
pub struct SelectorResult {
    pub kind: PageKind,
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
    pub next_url: Option<Url>,
    /// Child story links as (anchor text, absolute URL), document order, deduplicated.
    pub child_links: Vec<(String, Url)>,
    /// Name of the body heuristic that matched, for diagnostics.
    pub matched_by: Option<&'static str>,
}

/// Article-body selector chain, most specific first. Shared class/id naming
/// conventions across story and blog platforms.
const CONTENT_SELECTORS: &[&str] = &[
    "div.story-text p",
    ".story-content p",
    ".story-body p",
    "#story p",
    "div[class*=\"story\"] p",
    ".entry-content p",
    ".post-content p",
    "article p",
    ".content p",
    "div.text p",
    "main p",
];

/// Story-list selector chain for index pages, most specific first.
const CHILD_SELECTOR_CHAIN: &[&str] = &[
    ".story-title a",
    "div.story-list a",
    ".content-item a",
    "article h2 a",
    "article h3 a",
    "h2 a",
    "h3 a",
    "h4 a",
];

/// Visible anchor text that marks a pagination link.
const NEXT_TEXT: &[&str] = &[
    "next",
    "next page",
    "next »",
    "next >",
    "next chapter",
    "»",
    ">",
    "→",
    "older",
    "older posts",
];

/// Page regions that never contain narrative text or story listings.
const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside"];

/// Resolve one fetched page into a classified [SelectorResult].
pub fn resolve(page: &Page, config: &ResolverConfig) -> SelectorResult {
    let doc = Html::parse_document(&page.html);
    let title = resolve_title(&doc);
    let next_url = resolve_next_url(&doc, &page.url);

    if let Some((paragraphs, matched_by)) = resolve_body(&doc, config) {
        // A story page that also lists related stories in a sidebar must not
        // be misclassified as an index: chapter content wins.
        return SelectorResult {
            kind: PageKind::Chapter,
            title,
            paragraphs,
            next_url,
            child_links: Vec::new(),
            matched_by: Some(matched_by),
        };
    }

    let child_links = resolve_child_links(&doc, &page.url, config);
    if child_links.len() >= config.min_index_children {
        return SelectorResult {
            kind: PageKind::Index,
            title,
            paragraphs: Vec::new(),
            next_url,
            child_links,
            matched_by: None,
        };
    }

    SelectorResult {
        kind: PageKind::Empty,
        title,
        paragraphs: Vec::new(),
        next_url: None,
        child_links: Vec::new(),
        matched_by: None,
    }
}

/// Resolve ignoring story text: for callers that know the page is a listing
/// (mode override), bypassing chapter-content precedence.
pub fn resolve_as_index(page: &Page, config: &ResolverConfig) -> SelectorResult {
    let doc = Html::parse_document(&page.html);
    let title = resolve_title(&doc);
    let child_links = resolve_child_links(&doc, &page.url, config);
    let kind = if child_links.is_empty() {
        PageKind::Empty
    } else {
        PageKind::Index
    };
    SelectorResult {
        kind,
        title,
        paragraphs: Vec::new(),
        next_url: resolve_next_url(&doc, &page.url),
        child_links,
        matched_by: None,
    }
}

/// Try the body heuristics in priority order; first non-trivial match wins.
fn resolve_body(doc: &Html, config: &ResolverConfig) -> Option<(Vec<String>, &'static str)> {
    content_container(doc, config)
        .or_else(|| densest_region(doc, config))
        .or_else(|| document_paragraphs(doc, config))
}

/// Heuristic 1: paragraphs under a known article-body container.
fn content_container(doc: &Html, config: &ResolverConfig) -> Option<(Vec<String>, &'static str)> {
    for sel_str in CONTENT_SELECTORS {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        let paragraphs: Vec<String> = doc
            .select(&sel)
            .filter_map(|el| valid_paragraph(el, config.min_paragraph_chars))
            .collect();
        if paragraphs.len() >= config.min_paragraphs {
            return Some((paragraphs, "content-container"));
        }
    }
    None
}

/// Heuristic 2: the parent element owning the most paragraph children wins.
fn densest_region(doc: &Html, config: &ResolverConfig) -> Option<(Vec<String>, &'static str)> {
    let p_sel = Selector::parse("p").ok()?;
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut slot_by_parent = HashMap::new();
    for el in doc.select(&p_sel) {
        let Some(text) = valid_paragraph(el, config.min_paragraph_chars) else {
            continue;
        };
        let Some(parent) = el.parent() else {
            continue;
        };
        let slot = *slot_by_parent.entry(parent.id()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(text);
    }
    // Prefer the earliest group on ties so document order decides.
    let mut best: Option<usize> = None;
    for (i, group) in groups.iter().enumerate() {
        if best.map_or(true, |b| group.len() > groups[b].len()) {
            best = Some(i);
        }
    }
    let paragraphs = std::mem::take(&mut groups[best?]);
    if paragraphs.len() >= config.min_paragraphs {
        Some((paragraphs, "densest-region"))
    } else {
        None
    }
}

/// Heuristic 3: every paragraph in document order outside chrome regions,
/// with a doubled character threshold to keep boilerplate out.
fn document_paragraphs(doc: &Html, config: &ResolverConfig) -> Option<(Vec<String>, &'static str)> {
    let p_sel = Selector::parse("p").ok()?;
    let min_chars = config.min_paragraph_chars * 2;
    let paragraphs: Vec<String> = doc
        .select(&p_sel)
        .filter(|el| !in_chrome_region(el))
        .filter_map(|el| valid_paragraph(el, min_chars))
        .collect();
    if paragraphs.len() >= config.min_paragraphs {
        Some((paragraphs, "document-paragraphs"))
    } else {
        None
    }
}

/// Title resolution: og:title metadata, then the first heading, then the
/// document title element. Callers fall back to the task hint or URL slug.
fn resolve_title(doc: &Html) -> Option<String> {
    if let Ok(sel) = Selector::parse("meta[property=\"og:title\"]") {
        if let Some(title) = doc
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|s| strip_site_suffix(s).to_string())
            .filter(|s| !s.is_empty())
        {
            return Some(title);
        }
    }
    for sel_str in &["h1", "h2", "h3"] {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(title) = doc
            .select(&sel)
            .map(element_text)
            .find(|t| !t.is_empty())
        {
            return Some(title);
        }
    }
    if let Ok(sel) = Selector::parse("title") {
        if let Some(title) = doc
            .select(&sel)
            .next()
            .map(element_text)
            .map(|t| strip_site_suffix(&t).to_string())
            .filter(|s| !s.is_empty())
        {
            return Some(title);
        }
    }
    None
}

/// Strip a trailing `" | Site Name"` style suffix from a page title.
fn strip_site_suffix(title: &str) -> &str {
    let title = title.trim();
    for sep in [" | ", " :: "] {
        if let Some(idx) = title.rfind(sep) {
            let head = title[..idx].trim();
            if !head.is_empty() {
                return head;
            }
        }
    }
    title
}

/// Find the "next page" link: rel=next, a known next word as visible text, a
/// `next`-bearing class, or a numeric-increment URL pattern. The target must
/// be same-host and distinct from the current page.
fn resolve_next_url(doc: &Html, base: &Url) -> Option<Url> {
    let a_sel = Selector::parse("a[href]").ok()?;
    let mut current = base.clone();
    current.set_fragment(None);
    for el in doc.select(&a_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(target) = absolutize(base, href) else {
            continue;
        };
        if target == current || target.host_str() != base.host_str() {
            continue;
        }
        let rel_next = el
            .value()
            .attr("rel")
            .map(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case("next")))
            .unwrap_or(false);
        let class = el.value().attr("class").unwrap_or("").to_lowercase();
        let class_next = class.contains("next") && !class.contains("prev");
        let text = element_text(el).to_lowercase();
        let text_next = NEXT_TEXT.contains(&text.as_str());
        if rel_next || text_next || class_next || increments_page(&current, &target) {
            return Some(target);
        }
    }
    None
}

/// Enumerate child story links: the selector chain first, then a common
/// path-prefix grouping over all anchors. Document order, deduplicated.
fn resolve_child_links(doc: &Html, base: &Url, config: &ResolverConfig) -> Vec<(String, Url)> {
    for sel_str in CHILD_SELECTOR_CHAIN {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        let links = collect_links(doc.select(&sel), base);
        if links.len() >= config.min_index_children {
            return links;
        }
    }

    // Fallback: many short items sharing a leading path segment.
    let Ok(a_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let all = collect_links(doc.select(&a_sel), base);
    let mut groups: Vec<(String, Vec<(String, Url)>)> = Vec::new();
    for (text, url) in all {
        let segment = url
            .path_segments()
            .and_then(|mut s| s.next())
            .unwrap_or("")
            .to_string();
        match groups.iter_mut().find(|(seg, _)| *seg == segment) {
            Some((_, group)) => group.push((text, url)),
            None => groups.push((segment, vec![(text, url)])),
        }
    }
    groups
        .into_iter()
        .map(|(_, group)| group)
        .max_by_key(|group| group.len())
        .filter(|group| group.len() >= config.min_index_children)
        .unwrap_or_default()
}

/// Collect candidate child links from a selection, deduplicated by URL.
fn collect_links<'a>(
    elements: impl Iterator<Item = ElementRef<'a>>,
    base: &Url,
) -> Vec<(String, Url)> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in elements {
        let Some((text, url)) = candidate_link(el, base) else {
            continue;
        };
        if seen.insert(url.to_string()) {
            links.push((text, url));
        }
    }
    links
}

/// A child-link candidate: same host, not the page itself, not the site root,
/// not a pagination link, with at least a word of anchor text.
fn candidate_link(el: ElementRef, base: &Url) -> Option<(String, Url)> {
    if in_chrome_region(&el) {
        return None;
    }
    let href = el.value().attr("href")?;
    let url = absolutize(base, href)?;
    if url.host_str() != base.host_str() || url.path() == base.path() || url.path() == "/" {
        return None;
    }
    let text = element_text(el);
    if text.chars().count() < 3 {
        return None;
    }
    let lower = text.to_lowercase();
    if NEXT_TEXT.contains(&lower.as_str()) || lower.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((text, url))
}

/// True when `candidate` is `current` with a page component one higher:
/// `?page=N` → `?page=N+1` (a missing component counts as page 1), or a
/// trailing numeric path segment incremented by one.
fn increments_page(current: &Url, candidate: &Url) -> bool {
    let (cur_base, cur_page) = split_query_page(current);
    let (cand_base, cand_page) = split_query_page(candidate);
    if let Some(cand_n) = cand_page {
        if cur_base == cand_base {
            return cand_n == cur_page.unwrap_or(1) + 1;
        }
    }
    if let (Some((cur_stem, cur_n)), Some((cand_stem, cand_n))) =
        (trailing_number(current), trailing_number(candidate))
    {
        return cur_stem == cand_stem && cand_n == cur_n + 1;
    }
    false
}

/// Split off a `page=N` query pair: returns the URL text without it plus N.
fn split_query_page(url: &Url) -> (String, Option<u64>) {
    let mut page = None;
    let rest: Vec<String> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            if k == "page" {
                page = v.parse().ok();
                None
            } else {
                Some(format!("{}={}", k, v))
            }
        })
        .collect();
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    let joined = rest.join("&");
    stripped.set_query(if rest.is_empty() {
        None
    } else {
        Some(joined.as_str())
    });
    (stripped.to_string(), page)
}

/// A trailing numeric path segment: returns (URL stem without it, N).
fn trailing_number(url: &Url) -> Option<(String, u64)> {
    let mut segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let last = segments.pop()?;
    let n: u64 = last.parse().ok()?;
    Some((
        format!(
            "{}://{}/{}",
            url.scheme(),
            url.host_str().unwrap_or(""),
            segments.join("/")
        ),
        n,
    ))
}

/// Resolve an href against the page URL; http(s) only, fragment stripped.
fn absolutize(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Element text with whitespace normalized.
fn element_text(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A paragraph passes when it is long enough and not link-dominated.
fn valid_paragraph(el: ElementRef, min_chars: usize) -> Option<String> {
    let text = element_text(el);
    if text.chars().count() < min_chars || link_dominated(el) {
        return None;
    }
    Some(text)
}

/// True when anchor text makes up at least half the paragraph: a list item,
/// not narrative.
fn link_dominated(el: ElementRef) -> bool {
    let total = element_text(el).chars().count();
    if total == 0 {
        return true;
    }
    let Ok(a_sel) = Selector::parse("a") else {
        return false;
    };
    let linked: usize = el
        .select(&a_sel)
        .map(|a| element_text(a).chars().count())
        .sum();
    linked * 2 >= total
}

/// True when the element sits inside nav/header/footer/aside.
fn in_chrome_region(el: &ElementRef) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| CHROME_TAGS.contains(&e.name()))
            .unwrap_or(false)
    })
}
