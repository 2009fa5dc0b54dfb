//! CLI parsing and the run loop. Parses args, streams scraped stories into
//! EPUB, JSON, HTML, Markdown, or text files, and maps errors to exit codes.

use crate::config::{self, Config};
use crate::epub::{write_epub, EpubError, EpubVersion};
use crate::formats::{write_html, write_markdown, write_text, FormatError, OutputFormat};
use crate::model::{Chapter, StoryTask};
use crate::scraper::{
    process, resolve, resolve_as_index, slug_from_url, ClientSettings, IndexWalker, Mode, PageKind,
    ResolverConfig, RunOptions, ScraperError, SkipFn, TaskOutcome, TaskReport,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Format(#[from] FormatError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Epub(_) | CliRunError::Format(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "talescrape")]
#[command(about = "Scrape stories from a text site and write offline-readable documents")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, request_delay_secs, timeout_secs, max_retries, retry_base_delay_ms, max_concurrency, max_pages, max_index_pages, index_depth, min_paragraphs, min_paragraph_chars) are documented in the README. CLI flags override config."
)]
pub struct Args {
    /// Story or index URL (absolute http(s)).
    pub url: String,

    /// Output directory. Default: ./downloads (or config output_dir).
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output format: epub, json, html, markdown, or text.
    #[arg(long, default_value = "epub", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Override page classification: auto, story, index, or series
    /// (series merges an index's children into one document).
    #[arg(long, default_value = "auto", value_parser = parse_mode)]
    pub mode: Mode,

    /// Generate EPUB 2 instead of EPUB 3 (only when format is epub).
    #[arg(long)]
    pub epub_2: bool,

    /// Include toc.ncx in EPUB 3 output for legacy readers (no effect for EPUB 2, which always includes NCX).
    #[arg(long)]
    pub ncx: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long)]
    pub verbose: bool,

    /// Re-download stories whose output file already exists.
    #[arg(long)]
    pub force: bool,

    /// Enumerate stories and print planned output paths without downloading.
    #[arg(long)]
    pub dry_run: bool,

    /// Simultaneous story workers for index runs (overrides config; default 3).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// HTTP attempts per fetch for transient failures (overrides config; default 4).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Hard cap on pages per chapter (overrides config; default 500).
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Nested-index recursion bound (overrides config; default 2).
    #[arg(long)]
    pub index_depth: Option<usize>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds per worker (overrides config; default 2).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Minimum paragraphs for a body heuristic to match (overrides config; default 2).
    #[arg(long)]
    pub min_paragraphs: Option<usize>,

    /// Minimum characters per paragraph (overrides config; default 12).
    #[arg(long)]
    pub min_paragraph_chars: Option<usize>,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    match s.to_lowercase().as_str() {
        "auto" => Ok(Mode::Auto),
        "story" | "single" => Ok(Mode::Story),
        "index" | "category" => Ok(Mode::Index),
        "series" => Ok(Mode::Series),
        _ => Err(format!(
            "Invalid --mode value: '{}'. Use auto, story, index, or series.",
            s
        )),
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "epub" => Ok(OutputFormat::Epub),
        "json" => Ok(OutputFormat::Json),
        "html" => Ok(OutputFormat::Html),
        "markdown" | "md" => Ok(OutputFormat::Markdown),
        "text" | "txt" => Ok(OutputFormat::Text),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use epub, json, html, markdown, or text.",
            s
        )),
    }
}

fn extension_for_format(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Epub => "epub",
        OutputFormat::Json => "json",
        OutputFormat::Html => "html",
        OutputFormat::Markdown => "md",
        OutputFormat::Text => "txt",
    }
}

/// Output path for a task: `<output-dir>/<url-slug>.<ext>`. The slug doubles
/// as the skip-if-exists identity, so it is known before any fetch.
fn output_path_for(task_url: &str, output_dir: &Path, ext: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", slug_from_url(task_url), ext))
}

/// Merge CLI flags over config over defaults into run options and output dir.
fn effective_options(args: &Args, config: Option<&Config>) -> (RunOptions, PathBuf) {
    const DEFAULT_DELAY_SECS: u64 = 2;
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_MAX_RETRIES: u32 = 4;

    let delay_secs = args
        .delay
        .or_else(|| config.and_then(|c| c.request_delay_secs))
        .unwrap_or(DEFAULT_DELAY_SECS);
    let timeout_secs = args
        .timeout
        .or_else(|| config.and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let max_retries = args
        .max_retries
        .or_else(|| config.and_then(|c| c.max_retries))
        .unwrap_or(DEFAULT_MAX_RETRIES)
        .max(1);

    let client_defaults = ClientSettings::default();
    let client = ClientSettings {
        user_agent: args
            .user_agent
            .clone()
            .or_else(|| config.and_then(|c| c.user_agent.clone())),
        delay_ms: delay_secs * 1_000,
        timeout_secs,
        max_attempts: max_retries,
        backoff_base_ms: config
            .and_then(|c| c.retry_base_delay_ms)
            .unwrap_or(client_defaults.backoff_base_ms),
        backoff_cap_ms: client_defaults.backoff_cap_ms,
    };

    let resolver_defaults = ResolverConfig::default();
    let resolver = ResolverConfig {
        min_paragraphs: args
            .min_paragraphs
            .or_else(|| config.and_then(|c| c.min_paragraphs))
            .unwrap_or(resolver_defaults.min_paragraphs),
        min_paragraph_chars: args
            .min_paragraph_chars
            .or_else(|| config.and_then(|c| c.min_paragraph_chars))
            .unwrap_or(resolver_defaults.min_paragraph_chars),
        min_index_children: resolver_defaults.min_index_children,
    };

    let run_defaults = RunOptions::default();
    let opts = RunOptions {
        mode: args.mode,
        client,
        resolver,
        max_pages: args
            .max_pages
            .or_else(|| config.and_then(|c| c.max_pages))
            .unwrap_or(run_defaults.max_pages)
            .max(1),
        max_index_pages: config
            .and_then(|c| c.max_index_pages)
            .unwrap_or(run_defaults.max_index_pages)
            .max(1),
        index_depth: args
            .index_depth
            .or_else(|| config.and_then(|c| c.index_depth))
            .unwrap_or(run_defaults.index_depth)
            .max(1),
        max_concurrency: args
            .concurrency
            .or_else(|| config.and_then(|c| c.max_concurrency))
            .unwrap_or(run_defaults.max_concurrency)
            .max(1),
    };

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| config.and_then(|c| c.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("downloads"));

    (opts, output_dir)
}

/// Write one assembled story in the selected format.
fn write_story(args: &Args, chapter: &Chapter, path: &Path) -> Result<(), CliRunError> {
    match args.format {
        OutputFormat::Epub => {
            let version = if args.epub_2 {
                EpubVersion::Epub2
            } else {
                EpubVersion::Epub3
            };
            write_epub(chapter, path, version, args.ncx)?;
        }
        OutputFormat::Json => write_json(chapter, path)?,
        OutputFormat::Html => write_html(chapter, path)?,
        OutputFormat::Markdown => write_markdown(chapter, path)?,
        OutputFormat::Text => write_text(chapter, path)?,
    }
    Ok(())
}

fn write_json(chapter: &Chapter, path: &Path) -> Result<(), FormatError> {
    let staged = path.with_extension("part");
    let f = std::fs::File::create(&staged).map_err(|e| FormatError::Io {
        path: staged.clone(),
        source: e,
    })?;
    serde_json::to_writer_pretty(f, chapter)
        .map_err(|e| FormatError::Write(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::rename(&staged, path).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn emit(spinner: &Option<ProgressBar>, quiet: bool, msg: String) {
    match spinner {
        Some(pb) => pb.println(msg),
        None if !quiet => eprintln!("{}", msg),
        None => {}
    }
}

/// Errors are surfaced even under --quiet.
fn emit_error(spinner: &Option<ProgressBar>, msg: String) {
    match spinner {
        Some(pb) => pb.println(msg),
        None => eprintln!("{}", msg),
    }
}

/// Enumerate without downloading: print planned tasks and output paths.
fn dry_run(
    args: &Args,
    opts: &RunOptions,
    output_dir: &Path,
    ext: &str,
) -> Result<(), CliRunError> {
    let url = reqwest::Url::parse(&args.url).map_err(|e| {
        CliRunError::InvalidInput(format!("Expected a story or index URL: {}: {}", args.url, e))
    })?;
    let mut client = opts.client.build().map_err(CliRunError::Scraper)?;
    let first_page = client.get_page(&url).map_err(CliRunError::Scraper)?;
    let mut first = resolve(&first_page, &opts.resolver);

    let as_index = matches!(args.mode, Mode::Index | Mode::Series)
        || (args.mode == Mode::Auto && first.kind == PageKind::Index);
    if as_index {
        if first.kind != PageKind::Index {
            first = resolve_as_index(&first_page, &opts.resolver);
        }
        let walker = IndexWalker::new(
            &mut client,
            &first_page,
            &first,
            opts.resolver.clone(),
            opts.max_index_pages,
        );
        let mut count = 0u32;
        for task in walker {
            count += 1;
            eprintln!(
                "{} -> {}",
                task.url,
                output_path_for(&task.url, output_dir, ext).display()
            );
        }
        eprintln!("{} stories found", count);
    } else {
        eprintln!(
            "Single story: {} -> {}",
            args.url,
            output_path_for(&args.url, output_dir, ext).display()
        );
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let (opts, output_dir) = effective_options(args, config.as_ref());

    std::fs::create_dir_all(&output_dir).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Cannot create output directory {}: {}",
            output_dir.display(),
            e
        ))
    })?;

    let ext = extension_for_format(args.format);

    if args.dry_run {
        return dry_run(args, &opts, &output_dir, ext);
    }

    let spinner: Option<ProgressBar> = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    };

    let force = args.force;
    let skip_dir = output_dir.clone();
    let skip = move |task: &StoryTask| {
        !force && output_path_for(&task.url, &skip_dir, ext).exists()
    };
    let skip_ref: &SkipFn = &skip;

    let mut write_error: Option<CliRunError> = None;
    let mut done = 0u32;
    let mut on_report = |report: TaskReport| {
        done += 1;
        if let Some(pb) = &spinner {
            pb.set_message(format!("{} stories processed", done));
        }
        match report.outcome {
            TaskOutcome::Story(chapter) => {
                let path = output_path_for(&report.task.url, &output_dir, ext);
                match write_story(args, &chapter, &path) {
                    Ok(()) => {
                        let label = if chapter.partial { "Partial" } else { "Saved" };
                        emit(&spinner, args.quiet, format!("{}: {}", label, path.display()));
                    }
                    Err(e) => {
                        emit_error(
                            &spinner,
                            format!("Could not write {}: {}", path.display(), e),
                        );
                        if write_error.is_none() {
                            write_error = Some(e);
                        }
                    }
                }
            }
            TaskOutcome::Skipped => {
                emit(
                    &spinner,
                    args.quiet,
                    format!("Skipped (exists): {}", report.task.url),
                );
            }
            TaskOutcome::Failed(e) => {
                emit_error(&spinner, format!("Failed: {}: {}", report.task.url, e));
            }
        }
    };

    let summary = process(&args.url, &opts, Some(skip_ref), &mut on_report)?;
    drop(on_report);

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    if let Some(e) = write_error {
        return Err(e);
    }
    if !args.quiet {
        eprintln!(
            "Done: {} saved, {} partial, {} skipped, {} failed.",
            summary.saved, summary.partial, summary.skipped, summary.failed
        );
    }
    if summary.saved == 0 && summary.partial == 0 && summary.skipped == 0 && summary.failed > 0 {
        return Err(CliRunError::Scraper(ScraperError::NoStoriesRetrieved));
    }
    Ok(())
}
