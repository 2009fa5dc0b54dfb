//! Single-file output formats: HTML, Markdown, and plain text.
//! Consumes one assembled Chapter and writes one file per story.
//!
//! Writes go to a temporary sibling path first and are renamed into place, so
//! an interrupted run never leaves a half-written document behind.

use crate::model::Chapter;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output format selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Epub,
    Json,
    Html,
    Markdown,
    Text,
}

/// Errors from the format writers (HTML, Markdown, text).
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Cannot write: story title is empty.")]
    EmptyTitle,

    #[error("Cannot write: story has no paragraphs.")]
    NoParagraphs,

    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

fn validate_chapter(chapter: &Chapter) -> Result<(), FormatError> {
    if chapter.title.trim().is_empty() {
        return Err(FormatError::EmptyTitle);
    }
    if chapter.paragraphs.is_empty() {
        return Err(FormatError::NoParagraphs);
    }
    Ok(())
}

pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Temporary sibling path used until the document is complete.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Create the staging file, run the writer, then rename into place.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut File) -> Result<(), FormatError>,
) -> Result<(), FormatError> {
    let staged = staging_path(path);
    let mut f = File::create(&staged).map_err(|e| FormatError::Io {
        path: staged.clone(),
        source: e,
    })?;
    write(&mut f)?;
    f.sync_all().ok();
    drop(f);
    std::fs::rename(&staged, path).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

const PARTIAL_NOTICE: &str =
    "Note: this download is incomplete; one or more continuation pages could not be retrieved.";

/// Write a single HTML file: title, optional incomplete notice, paragraphs,
/// and a source list.
pub fn write_html(chapter: &Chapter, path: &Path) -> Result<(), FormatError> {
    validate_chapter(chapter)?;

    write_atomically(path, |f| {
        let title_esc = html_escape(&chapter.title);
        writeln!(f, r#"<!DOCTYPE html>"#)?;
        writeln!(f, r#"<html lang="en">"#)?;
        writeln!(f, r#"<head>"#)?;
        writeln!(f, r#"  <meta charset="UTF-8"/>"#)?;
        writeln!(f, r#"  <title>{}</title>"#, title_esc)?;
        writeln!(f, r#"</head>"#)?;
        writeln!(f, r#"<body>"#)?;
        writeln!(f, r#"  <header>"#)?;
        writeln!(f, r#"    <h1>{}</h1>"#, title_esc)?;
        if chapter.partial {
            writeln!(f, r#"    <p class="notice">{}</p>"#, PARTIAL_NOTICE)?;
        }
        writeln!(f, r#"  </header>"#)?;
        writeln!(f, r#"  <section class="story">"#)?;
        for p in &chapter.paragraphs {
            writeln!(f, r#"    <p>{}</p>"#, html_escape(p))?;
        }
        writeln!(f, r#"  </section>"#)?;
        writeln!(f, r#"  <footer>"#)?;
        writeln!(f, r#"    <ul class="sources">"#)?;
        for url in &chapter.source_urls {
            let url_esc = html_escape(url);
            writeln!(f, r#"      <li><a href="{}">{}</a></li>"#, url_esc, url_esc)?;
        }
        writeln!(f, r#"    </ul>"#)?;
        writeln!(f, r#"  </footer>"#)?;
        writeln!(f, r#"</body>"#)?;
        writeln!(f, r#"</html>"#)?;
        Ok(())
    })
}

/// Write a single Markdown file: title header, paragraphs, source list.
pub fn write_markdown(chapter: &Chapter, path: &Path) -> Result<(), FormatError> {
    validate_chapter(chapter)?;

    write_atomically(path, |f| {
        writeln!(f, "# {}", chapter.title)?;
        writeln!(f)?;
        if chapter.partial {
            writeln!(f, "> {}", PARTIAL_NOTICE)?;
            writeln!(f)?;
        }
        for p in &chapter.paragraphs {
            writeln!(f, "{}", p)?;
            writeln!(f)?;
        }
        writeln!(f, "---")?;
        writeln!(f)?;
        for url in &chapter.source_urls {
            writeln!(f, "- <{}>", url)?;
        }
        Ok(())
    })
}

/// Write a single plain-text file: title, paragraphs separated by blank
/// lines, source list.
pub fn write_text(chapter: &Chapter, path: &Path) -> Result<(), FormatError> {
    validate_chapter(chapter)?;

    write_atomically(path, |f| {
        writeln!(f, "{}", chapter.title)?;
        if chapter.partial {
            writeln!(f, "[{}]", PARTIAL_NOTICE)?;
        }
        for p in &chapter.paragraphs {
            writeln!(f)?;
            writeln!(f, "{}", p)?;
        }
        writeln!(f)?;
        writeln!(f, "---")?;
        for url in &chapter.source_urls {
            writeln!(f, "{}", url)?;
        }
        Ok(())
    })
}
