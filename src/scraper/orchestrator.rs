//! Orchestration: classify the starting URL, then drive the pagination and
//! index walkers, streaming per-story results to the caller as they finish.
//!
//! Task failures are isolated: each story succeeds, degrades to partial, or
//! fails on its own. The run itself only fails on a malformed starting URL,
//! client construction failure, or failure of the very first fetch.

use crate::model::{Chapter, RunSummary, StoryTask};
use crate::scraper::chapter::collect_chapter;
use crate::scraper::client::{ClientSettings, Page, PoliteClient};
use crate::scraper::error::ScraperError;
use crate::scraper::index::IndexWalker;
use crate::scraper::resolve::{
    resolve, resolve_as_index, PageKind, ResolverConfig, SelectorResult,
};
use crate::scraper::{slug_from_url, url_key};
use reqwest::Url;
use std::collections::HashSet;
use std::sync::{mpsc, Mutex};

/// Classification override for the starting URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Classify by resolving the page.
    #[default]
    Auto,
    /// Treat the page as a single story even if it looks like a listing.
    Story,
    /// Treat the page as an index even if it carries story text.
    Index,
    /// Treat the child list as a known-ahead chapter list and merge all
    /// children into one document, in list order.
    Series,
}

/// Options for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub client: ClientSettings,
    pub resolver: ResolverConfig,
    /// Hard cap on pages per chapter.
    pub max_pages: usize,
    /// Hard cap on listing pages per index.
    pub max_index_pages: usize,
    /// Nested-index recursion bound.
    pub index_depth: usize,
    /// Simultaneous story workers for index runs.
    pub max_concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            client: ClientSettings::default(),
            resolver: ResolverConfig::default(),
            max_pages: 500,
            max_index_pages: 50,
            index_depth: 2,
            max_concurrency: 3,
        }
    }
}

/// Outcome of one story task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Story assembled; `Chapter::partial` flags incomplete content.
    Story(Chapter),
    /// Skipped before any fetch: identity already completed in this run or
    /// present on disk.
    Skipped,
    Failed(ScraperError),
}

/// One streamed result: the task plus what became of it.
#[derive(Debug)]
pub struct TaskReport {
    pub task: StoryTask,
    pub outcome: TaskOutcome,
}

/// Skip-if-exists predicate supplied by the caller, checked before a task is
/// started (the CLI checks the output path for the task's URL slug).
pub type SkipFn = dyn Fn(&StoryTask) -> bool + Sync;

/// Process one starting URL, streaming a [TaskReport] per story to
/// `on_report` on the calling thread, and return the run summary.
pub fn process(
    start_url: &str,
    opts: &RunOptions,
    skip: Option<&SkipFn>,
    on_report: &mut dyn FnMut(TaskReport),
) -> Result<RunSummary, ScraperError> {
    let url = parse_start_url(start_url)?;
    let mut client = opts.client.build()?;
    // The very first fetch is the one fatal fetch: it distinguishes "this URL
    // is unreachable" from per-story failures later in the run.
    let first_page = client.get_page(&url)?;
    let mut first = resolve(&first_page, &opts.resolver);

    let kind = match opts.mode {
        Mode::Auto => first.kind,
        Mode::Story => PageKind::Chapter,
        Mode::Index | Mode::Series => {
            if first.kind != PageKind::Index {
                first = resolve_as_index(&first_page, &opts.resolver);
            }
            first.kind
        }
    };

    let start_task = StoryTask::new(url.to_string());
    let mut summary = RunSummary::default();
    match kind {
        PageKind::Chapter => {
            let outcome = if skip.map_or(false, |f| f(&start_task)) {
                TaskOutcome::Skipped
            } else {
                let chapter = collect_chapter(
                    &mut client,
                    &start_task,
                    first_page,
                    first,
                    &opts.resolver,
                    opts.max_pages,
                );
                if chapter.paragraphs.is_empty() {
                    TaskOutcome::Failed(ScraperError::NoContent {
                        url: url.to_string(),
                    })
                } else {
                    TaskOutcome::Story(chapter)
                }
            };
            tally(&mut summary, &outcome);
            on_report(TaskReport {
                task: start_task,
                outcome,
            });
        }
        PageKind::Empty => {
            let outcome = TaskOutcome::Failed(ScraperError::NoContent {
                url: url.to_string(),
            });
            tally(&mut summary, &outcome);
            on_report(TaskReport {
                task: start_task,
                outcome,
            });
        }
        PageKind::Index if opts.mode == Mode::Series => {
            let outcome = collect_series(&mut client, &start_task, &first_page, &first, opts);
            tally(&mut summary, &outcome);
            on_report(TaskReport {
                task: start_task,
                outcome,
            });
        }
        PageKind::Index => {
            summary = run_pool(client, first_page, first, opts, skip, on_report);
        }
    }
    Ok(summary)
}

/// Validate the starting URL: absolute http(s) with a host.
fn parse_start_url(input: &str) -> Result<Url, ScraperError> {
    let url = Url::parse(input).map_err(|e| ScraperError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScraperError::InvalidUrl {
            input: input.to_string(),
            reason: "expected an http or https URL".to_string(),
        });
    }
    if url.host_str().is_none() {
        return Err(ScraperError::InvalidUrl {
            input: input.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(url)
}

fn tally(summary: &mut RunSummary, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Story(chapter) if chapter.partial => summary.partial += 1,
        TaskOutcome::Story(_) => summary.saved += 1,
        TaskOutcome::Skipped => summary.skipped += 1,
        TaskOutcome::Failed(_) => summary.failed += 1,
    }
}

/// Index run: one producer thread enumerates tasks lazily into a bounded
/// channel; workers each own a client and process one task to completion at a
/// time; reports stream back to the calling thread.
fn run_pool(
    producer_client: PoliteClient,
    first_page: Page,
    first: SelectorResult,
    opts: &RunOptions,
    skip: Option<&SkipFn>,
    on_report: &mut dyn FnMut(TaskReport),
) -> RunSummary {
    let workers = opts.max_concurrency.max(1);
    let (task_tx, task_rx) = mpsc::sync_channel::<StoryTask>(workers * 4);
    let (report_tx, report_rx) = mpsc::channel::<TaskReport>();
    let task_rx = Mutex::new(task_rx);
    let completed: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

    let mut summary = RunSummary::default();
    std::thread::scope(|s| {
        let task_rx = &task_rx;
        let completed = &completed;

        s.spawn(move || {
            let mut client = producer_client;
            let walker = IndexWalker::new(
                &mut client,
                &first_page,
                &first,
                opts.resolver.clone(),
                opts.max_index_pages,
            );
            for task in walker {
                if task_tx.send(task).is_err() {
                    break;
                }
            }
        });

        for _ in 0..workers {
            let report_tx = report_tx.clone();
            s.spawn(move || {
                let mut client = match opts.client.build() {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("Worker could not build HTTP client: {}", e);
                        return;
                    }
                };
                loop {
                    let received = {
                        let rx = task_rx.lock().unwrap();
                        rx.recv()
                    };
                    let Ok(task) = received else {
                        break;
                    };
                    process_task(&mut client, task, opts, skip, completed, 1, &report_tx);
                }
            });
        }
        drop(report_tx);

        for report in report_rx {
            tally(&mut summary, &report.outcome);
            on_report(report);
        }
    });
    summary
}

/// Process one task on a worker: skip check, fetch, classify, walk. A nested
/// listing within the depth bound is expanded on the same worker.
fn process_task(
    client: &mut PoliteClient,
    task: StoryTask,
    opts: &RunOptions,
    skip: Option<&SkipFn>,
    completed: &Mutex<HashSet<String>>,
    depth: usize,
    report_tx: &mpsc::Sender<TaskReport>,
) {
    let slug = slug_from_url(&task.url);
    let already_done = completed.lock().unwrap().contains(&slug);
    if already_done || skip.map_or(false, |f| f(&task)) {
        let _ = report_tx.send(TaskReport {
            task,
            outcome: TaskOutcome::Skipped,
        });
        return;
    }

    let url = match Url::parse(&task.url) {
        Ok(u) => u,
        Err(e) => {
            let outcome = TaskOutcome::Failed(ScraperError::InvalidUrl {
                input: task.url.clone(),
                reason: e.to_string(),
            });
            let _ = report_tx.send(TaskReport { task, outcome });
            return;
        }
    };
    let page = match client.get_page(&url) {
        Ok(p) => p,
        Err(e) => {
            let _ = report_tx.send(TaskReport {
                task,
                outcome: TaskOutcome::Failed(e),
            });
            return;
        }
    };

    let result = resolve(&page, &opts.resolver);
    match result.kind {
        PageKind::Chapter => {
            let chapter = collect_chapter(client, &task, page, result, &opts.resolver, opts.max_pages);
            let outcome = if chapter.paragraphs.is_empty() {
                TaskOutcome::Failed(ScraperError::NoContent {
                    url: task.url.clone(),
                })
            } else {
                completed.lock().unwrap().insert(slug);
                TaskOutcome::Story(chapter)
            };
            let _ = report_tx.send(TaskReport { task, outcome });
        }
        PageKind::Index if depth < opts.index_depth => {
            let children: Vec<StoryTask> = IndexWalker::new(
                client,
                &page,
                &result,
                opts.resolver.clone(),
                opts.max_index_pages,
            )
            .collect();
            for child in children {
                process_task(client, child, opts, skip, completed, depth + 1, report_tx);
            }
        }
        PageKind::Index => {
            let outcome = TaskOutcome::Failed(ScraperError::IndexDepthExceeded {
                url: task.url.clone(),
            });
            let _ = report_tx.send(TaskReport { task, outcome });
        }
        PageKind::Empty => {
            let outcome = TaskOutcome::Failed(ScraperError::NoContent {
                url: task.url.clone(),
            });
            let _ = report_tx.send(TaskReport { task, outcome });
        }
    }
}

/// Series mode: walk every child in list order and merge them into one
/// document, each child introduced by a title paragraph. Pagination within a
/// child uses the ordinary chapter walk.
fn collect_series(
    client: &mut PoliteClient,
    start: &StoryTask,
    first_page: &Page,
    first: &SelectorResult,
    opts: &RunOptions,
) -> TaskOutcome {
    let series_title = first
        .title
        .clone()
        .unwrap_or_else(|| slug_from_url(&start.url));
    let children: Vec<StoryTask> = IndexWalker::new(
        client,
        first_page,
        first,
        opts.resolver.clone(),
        opts.max_index_pages,
    )
    .collect();
    if children.is_empty() {
        return TaskOutcome::Failed(ScraperError::NoContent {
            url: start.url.clone(),
        });
    }

    let mut paragraphs = Vec::new();
    let mut source_urls = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut partial = false;
    let mut number = 0u32;
    for child in &children {
        let url = match Url::parse(&child.url) {
            Ok(u) => u,
            Err(_) => {
                partial = true;
                continue;
            }
        };
        if visited.contains(&url_key(&url)) {
            continue;
        }
        let page = match client.get_page(&url) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Series part failed ({}): {}. Continuing without it.", url, e);
                partial = true;
                continue;
            }
        };
        let result = resolve(&page, &opts.resolver);
        if result.kind != PageKind::Chapter {
            partial = true;
            continue;
        }
        let chapter = collect_chapter(client, child, page, result, &opts.resolver, opts.max_pages);
        number += 1;
        paragraphs.push(format!("Chapter {}: {}", number, chapter.title));
        paragraphs.extend(chapter.paragraphs);
        partial |= chapter.partial;
        for u in chapter.source_urls {
            let key = Url::parse(&u).map(|p| url_key(&p)).unwrap_or_else(|_| u.clone());
            if visited.insert(key) {
                source_urls.push(u);
            }
        }
    }

    if paragraphs.is_empty() {
        TaskOutcome::Failed(ScraperError::NoContent {
            url: start.url.clone(),
        })
    } else {
        TaskOutcome::Story(Chapter {
            title: series_title,
            paragraphs,
            source_urls,
            partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testutil::TestServer;

    fn fast_options(concurrency: usize) -> RunOptions {
        RunOptions {
            max_concurrency: concurrency,
            client: ClientSettings {
                delay_ms: 0,
                max_attempts: 2,
                backoff_base_ms: 1,
                backoff_cap_ms: 4,
                ..ClientSettings::default()
            },
            ..RunOptions::default()
        }
    }

    fn chapter_html(marker: &str) -> String {
        format!(
            r#"<html><body><div class="story-content">
<p>{marker} first paragraph with enough body text to count.</p>
<p>{marker} second paragraph with enough body text to count.</p>
</div></body></html>"#
        )
    }

    fn index_html(hrefs: &[&str], next: Option<&str>) -> String {
        let mut items = String::new();
        for href in hrefs {
            let name = href.rsplit('/').next().unwrap_or("story");
            items.push_str(&format!(
                "<h3><a href=\"{}\">Listed story {}</a></h3>\n",
                href, name
            ));
        }
        let next_anchor = next
            .map(|n| format!(r#"<a rel="next" href="{}">next</a>"#, n))
            .unwrap_or_default();
        format!("<html><body>{}{}</body></html>", items, next_anchor)
    }

    fn collect_reports(
        url: &str,
        opts: &RunOptions,
        skip: Option<&SkipFn>,
    ) -> (RunSummary, Vec<TaskReport>) {
        let mut reports = Vec::new();
        let summary = process(url, opts, skip, &mut |r| reports.push(r)).unwrap();
        (summary, reports)
    }

    #[test]
    fn invalid_start_url_is_fatal() {
        let opts = fast_options(1);
        let result = process("not a url", &opts, None, &mut |_| {});
        assert!(matches!(result, Err(ScraperError::InvalidUrl { .. })));
        let result = process("ftp://example.com/x", &opts, None, &mut |_| {});
        assert!(matches!(result, Err(ScraperError::InvalidUrl { .. })));
    }

    #[test]
    fn first_fetch_failure_is_fatal() {
        let server = TestServer::spawn(|_, _| (404, "gone".to_string()));
        let opts = fast_options(1);
        let result = process(&server.url("/idx"), &opts, None, &mut |_| {});
        assert!(matches!(
            result,
            Err(ScraperError::HttpStatus { status: 404, .. })
        ));
    }

    #[test]
    fn single_story_url_produces_one_report() {
        let server = TestServer::spawn(|path, _| match path {
            "/s/solo" => (200, chapter_html("Solo")),
            _ => (404, "nope".to_string()),
        });
        let opts = fast_options(2);
        let (summary, reports) = collect_reports(&server.url("/s/solo"), &opts, None);
        assert_eq!(summary.saved, 1);
        assert_eq!(reports.len(), 1);
        match &reports[0].outcome {
            TaskOutcome::Story(chapter) => {
                assert_eq!(chapter.paragraphs.len(), 2);
                assert!(!chapter.partial);
            }
            other => panic!("expected Story, got {:?}", other),
        }
    }

    #[test]
    fn start_page_with_no_content_fails_in_isolation() {
        let server = TestServer::spawn(|_, _| (200, "<html><body></body></html>".to_string()));
        let opts = fast_options(1);
        let (summary, reports) = collect_reports(&server.url("/blank"), &opts, None);
        assert_eq!(summary.failed, 1);
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].outcome,
            TaskOutcome::Failed(ScraperError::NoContent { .. })
        ));
    }

    #[test]
    fn index_run_saves_every_child_story() {
        let server = TestServer::spawn(|path, _| {
            if path == "/idx" {
                (
                    200,
                    index_html(
                        &["/s/story-1", "/s/story-2", "/s/story-3", "/s/story-4", "/s/story-5"],
                        Some("/idx?page=2"),
                    ),
                )
            } else if path == "/idx?page=2" {
                (
                    200,
                    index_html(
                        &["/s/story-6", "/s/story-7", "/s/story-8", "/s/story-9", "/s/story-10"],
                        None,
                    ),
                )
            } else if let Some(name) = path.strip_prefix("/s/") {
                (200, chapter_html(name))
            } else {
                (404, "nope".to_string())
            }
        });
        let opts = fast_options(2);
        let (summary, reports) = collect_reports(&server.url("/idx"), &opts, None);
        assert_eq!(summary.saved, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(reports.len(), 10);
        for report in &reports {
            assert!(matches!(report.outcome, TaskOutcome::Story(_)));
        }
    }

    #[test]
    fn one_failing_child_does_not_halt_the_run() {
        let server = TestServer::spawn(|path, _| match path {
            "/idx" => (
                200,
                index_html(&["/s/story-1", "/s/story-2", "/s/story-3"], None),
            ),
            "/s/story-2" => (404, "gone".to_string()),
            path if path.starts_with("/s/") => (200, chapter_html("ok")),
            _ => (404, "nope".to_string()),
        });
        let opts = fast_options(2);
        let (summary, reports) = collect_reports(&server.url("/idx"), &opts, None);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failed, 1);
        let failed: Vec<_> = reports
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].task.url.ends_with("/s/story-2"));
    }

    #[test]
    fn skip_predicate_prevents_fetching_existing_stories() {
        let server = TestServer::spawn(|path, _| match path {
            "/idx" => (
                200,
                index_html(&["/s/story-1", "/s/story-2", "/s/story-3"], None),
            ),
            path if path.starts_with("/s/") => (200, chapter_html("ok")),
            _ => (404, "nope".to_string()),
        });
        let opts = fast_options(2);
        let skip = |task: &StoryTask| slug_from_url(&task.url) == "story-2";
        let (summary, reports) = collect_reports(&server.url("/idx"), &opts, Some(&skip));
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(reports.len(), 3);
        assert_eq!(server.hits("/s/story-2"), 0);
    }

    #[test]
    fn nested_index_expands_within_depth_bound() {
        let server = TestServer::spawn(|path, _| match path {
            "/idx" => (
                200,
                index_html(&["/s/story-1", "/s/story-2", "/sub/more"], None),
            ),
            "/sub/more" => (
                200,
                index_html(&["/s/story-3", "/s/story-4", "/s/story-5"], None),
            ),
            path if path.starts_with("/s/") => (200, chapter_html("ok")),
            _ => (404, "nope".to_string()),
        });
        let opts = fast_options(2);
        let (summary, _) = collect_reports(&server.url("/idx"), &opts, None);
        assert_eq!(summary.saved, 5);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn nested_index_beyond_depth_bound_fails_in_isolation() {
        let server = TestServer::spawn(|path, _| match path {
            "/idx" => (
                200,
                index_html(&["/s/story-1", "/s/story-2", "/sub/more"], None),
            ),
            "/sub/more" => (
                200,
                index_html(&["/s/story-3", "/s/story-4", "/s/story-5"], None),
            ),
            path if path.starts_with("/s/") => (200, chapter_html("ok")),
            _ => (404, "nope".to_string()),
        });
        let mut opts = fast_options(2);
        opts.index_depth = 1;
        let (summary, reports) = collect_reports(&server.url("/idx"), &opts, None);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failed, 1);
        assert!(reports.iter().any(|r| matches!(
            r.outcome,
            TaskOutcome::Failed(ScraperError::IndexDepthExceeded { .. })
        )));
    }

    #[test]
    fn series_mode_merges_children_into_one_document() {
        let server = TestServer::spawn(|path, _| match path {
            "/series/saga" => (
                200,
                index_html(&["/s/part-1", "/s/part-2", "/s/part-3"], None),
            ),
            path if path.starts_with("/s/") => (200, chapter_html("part")),
            _ => (404, "nope".to_string()),
        });
        let mut opts = fast_options(1);
        opts.mode = Mode::Series;
        let (summary, reports) = collect_reports(&server.url("/series/saga"), &opts, None);
        assert_eq!(summary.saved, 1);
        assert_eq!(reports.len(), 1);
        match &reports[0].outcome {
            TaskOutcome::Story(chapter) => {
                assert_eq!(chapter.source_urls.len(), 3);
                // Three title paragraphs plus two body paragraphs per part.
                assert_eq!(chapter.paragraphs.len(), 9);
                assert!(chapter.paragraphs[0].starts_with("Chapter 1:"));
                assert!(chapter.paragraphs[3].starts_with("Chapter 2:"));
            }
            other => panic!("expected Story, got {:?}", other),
        }
    }
}
