//! EPUB writer. Consumes one assembled Chapter and writes EPUB 2 or EPUB 3
//! (mimetype, container, OPF, nav/NCX, title page, story document).

use crate::model::Chapter;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

/// EPUB format version.
///
/// Default is EPUB 3 (OPF 3.0, nav.xhtml, HTML5 content). Use `Epub2` for legacy readers (OPF 2.0, NCX, XHTML 1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpubVersion {
    /// EPUB 3: OPF 3.0, nav.xhtml, HTML5 content. Optional toc.ncx for compatibility.
    Epub3,
    /// EPUB 2: OPF 2.0, toc.ncx only, XHTML 1.1 content.
    Epub2,
}

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: story title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: story has no paragraphs.")]
    NoParagraphs,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const PARTIAL_NOTICE: &str =
    "Note: this download is incomplete; one or more continuation pages could not be retrieved.";

/// Write one assembled [Chapter](crate::model::Chapter) to an EPUB file.
///
/// Set `epub3_include_ncx` to true to include toc.ncx in EPUB 3 for legacy
/// readers. The archive is assembled at a temporary sibling path and renamed
/// into place once finished, so an interrupted run never leaves a truncated
/// EPUB behind.
pub fn write_epub(
    chapter: &Chapter,
    path: &Path,
    version: EpubVersion,
    epub3_include_ncx: bool,
) -> Result<(), EpubError> {
    validate_chapter(chapter)?;

    let path = path.to_path_buf();
    let staged = staging_path(&path);
    let file = std::fs::File::create(&staged).map_err(|e| EpubError::CreateFile {
        path: staged.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // 1. Mimetype first, uncompressed (required by EPUB spec)
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    // 2. Container
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    match version {
        EpubVersion::Epub3 => {
            write_opf3(chapter, epub3_include_ncx, &mut zip, options_deflate)?;
            write_nav_xhtml(chapter, &mut zip, options_deflate)?;
            if epub3_include_ncx {
                write_ncx(chapter, &mut zip, options_deflate)?;
            }
            write_title_page(chapter, &mut zip, options_deflate)?;
            write_story_html5(chapter, &mut zip, options_deflate)?;
        }
        EpubVersion::Epub2 => {
            write_opf2(chapter, &mut zip, options_deflate)?;
            write_ncx(chapter, &mut zip, options_deflate)?;
            write_title_page(chapter, &mut zip, options_deflate)?;
            write_story_xhtml11(chapter, &mut zip, options_deflate)?;
        }
    }

    zip.finish()?;
    std::fs::rename(&staged, &path).map_err(|e| EpubError::Io { path, source: e })?;
    Ok(())
}

fn validate_chapter(chapter: &Chapter) -> Result<(), EpubError> {
    if chapter.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if chapter.paragraphs.is_empty() {
        return Err(EpubError::NoParagraphs);
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn identifier(chapter: &Chapter) -> String {
    chapter
        .source_urls
        .first()
        .map(String::as_str)
        .unwrap_or("urn:talescrape:story")
        .to_string()
}

fn write_opf3(
    chapter: &Chapter,
    include_ncx: bool,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let id = xml_escape(&identifier(chapter));
    let title = xml_escape(&chapter.title);

    let mut manifest = String::from(
        r#"<item id="content-opf" href="content.opf" media-type="application/oebps-package+xml"/>
  <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
"#,
    );
    if include_ncx {
        manifest.push_str(
            r#"  <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
    }
    manifest.push_str(
        r#"  <item id="title-page" href="title.xhtml" media-type="application/xhtml+xml"/>
  <item id="story" href="story.xhtml" media-type="application/xhtml+xml"/>
"#,
    );

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0"
  xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine>
  <itemref idref="title-page"/>
  <itemref idref="story"/>
  </spine>
</package>
"#,
        id = id,
        title = title,
        manifest = manifest
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_opf2(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let id = xml_escape(&identifier(chapter));
    let title = xml_escape(&chapter.title);

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="2.0"
  xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
<item id="content-opf" href="content.opf" media-type="application/oebps-package+xml"/>
  <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  <item id="title-page" href="title.xhtml" media-type="application/xhtml+xml"/>
  <item id="story" href="story.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
  <itemref idref="title-page"/>
  <itemref idref="story"/>
  </spine>
</package>
"#,
        id = id,
        title = title
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_nav_xhtml(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let title = html_escape(&chapter.title);
    let nav = format!(
        r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
    <li><a href="title.xhtml">Title</a></li>
    <li><a href="story.xhtml">{}</a></li>
    </ol>
  </nav>
</body>
</html>
"#,
        title
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_ncx(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let title = xml_escape(&chapter.title);
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
    <navPoint id="navpoint-1" playOrder="1">
      <navLabel><text>Title</text></navLabel>
      <content src="title.xhtml"/>
    </navPoint>
    <navPoint id="navpoint-2" playOrder="2">
      <navLabel><text>{}</text></navLabel>
      <content src="story.xhtml"/>
    </navPoint>
  </navMap>
</ncx>
"#,
        xml_escape(&identifier(chapter)),
        title,
        title
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

/// Title page: story title, optional incomplete notice, and the source URL.
fn write_title_page(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let title = html_escape(&chapter.title);
    let source = chapter
        .source_urls
        .first()
        .map(|u| format!(r#"    <p style="font-size: 0.8em;">{}</p>"#, html_escape(u)))
        .unwrap_or_default();
    let notice = if chapter.partial {
        format!(
            r#"    <p style="font-style: italic; margin-top: 2em;">{}</p>"#,
            PARTIAL_NOTICE
        )
    } else {
        String::new()
    };
    let title_xhtml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
  <div style="text-align: center; font-family: serif; margin-top: 3em;">
    <h1 style="font-size: 1.5em;">{}</h1>
{}
{}
  </div>
</body>
</html>
"#,
        title, title, source, notice
    );
    zip.start_file(format!("{}title.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(title_xhtml.as_bytes())?;
    Ok(())
}

fn story_body(chapter: &Chapter) -> String {
    let mut body = String::new();
    body.push_str(&format!("  <h1>{}</h1>\n", html_escape(&chapter.title)));
    for p in &chapter.paragraphs {
        body.push_str(&format!("  <p>{}</p>\n", html_escape(p)));
    }
    body
}

fn write_story_html5(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let html = format!(
        r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
{}
</body>
</html>
"#,
        html_escape(&chapter.title),
        story_body(chapter)
    );
    zip.start_file(format!("{}story.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(html.as_bytes())?;
    Ok(())
}

fn write_story_xhtml11(
    chapter: &Chapter,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let html = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
{}
</body>
</html>
"#,
        xml_escape(&chapter.title),
        story_body(chapter)
    );
    zip.start_file(format!("{}story.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(html.as_bytes())?;
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::read::ZipArchive;

    fn minimal_chapter() -> Chapter {
        Chapter {
            title: "Test Story".to_string(),
            paragraphs: vec!["First paragraph.".to_string()],
            source_urls: vec!["https://example.com/s/test-story".to_string()],
            partial: false,
        }
    }

    #[test]
    fn validate_rejects_empty_title() {
        let mut chapter = minimal_chapter();
        chapter.title.clear();
        let path = std::env::temp_dir().join("talescrape_epub_void.epub");
        let result = write_epub(&chapter, &path, EpubVersion::Epub3, false);
        assert!(matches!(result, Err(EpubError::EmptyTitle)));
    }

    #[test]
    fn validate_rejects_no_paragraphs() {
        let mut chapter = minimal_chapter();
        chapter.paragraphs.clear();
        let path = std::env::temp_dir().join("talescrape_epub_void.epub");
        let result = write_epub(&chapter, &path, EpubVersion::Epub3, false);
        assert!(matches!(result, Err(EpubError::NoParagraphs)));
    }

    #[test]
    fn write_epub3_produces_expected_archive_layout() {
        let chapter = minimal_chapter();
        let path = std::env::temp_dir().join("talescrape_epub_test_epub3.epub");
        write_epub(&chapter, &path, EpubVersion::Epub3, false).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"mimetype".to_string()));
        assert!(names.contains(&"META-INF/container.xml".to_string()));
        assert!(names.contains(&"OEBPS/content.opf".to_string()));
        assert!(names.contains(&"OEBPS/nav.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/title.xhtml".to_string()));
        assert!(zip.by_name("OEBPS/story.xhtml").is_ok());
        assert!(!names.iter().any(|n| n == "OEBPS/toc.ncx"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_epub3_with_ncx_includes_toc_ncx() {
        let chapter = minimal_chapter();
        let path = std::env::temp_dir().join("talescrape_epub_test_epub3_ncx.epub");
        write_epub(&chapter, &path, EpubVersion::Epub3, true).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let zip = ZipArchive::new(file).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"OEBPS/toc.ncx".to_string()));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_epub2_uses_opf2_and_ncx() {
        let chapter = minimal_chapter();
        let path = std::env::temp_dir().join("talescrape_epub_test_epub2.epub");
        write_epub(&chapter, &path, EpubVersion::Epub2, false).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"OEBPS/toc.ncx".to_string()));
        let mut opf = zip.by_name("OEBPS/content.opf").unwrap();
        let mut opf_content = String::new();
        opf.read_to_string(&mut opf_content).unwrap();
        assert!(opf_content.contains("version=\"2.0\""));
        assert!(opf_content.contains("spine toc=\"ncx\""));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn story_document_contains_escaped_paragraphs() {
        let mut chapter = minimal_chapter();
        chapter.paragraphs = vec!["Fish & <chips>".to_string()];
        let path = std::env::temp_dir().join("talescrape_epub_test_escape.epub");
        write_epub(&chapter, &path, EpubVersion::Epub3, false).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let mut story = zip.by_name("OEBPS/story.xhtml").unwrap();
        let mut content = String::new();
        story.read_to_string(&mut content).unwrap();
        assert!(content.contains("Fish &amp; &lt;chips&gt;"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn partial_story_carries_notice_on_title_page() {
        let mut chapter = minimal_chapter();
        chapter.partial = true;
        let path = std::env::temp_dir().join("talescrape_epub_test_partial.epub");
        write_epub(&chapter, &path, EpubVersion::Epub3, false).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let mut title = zip.by_name("OEBPS/title.xhtml").unwrap();
        let mut content = String::new();
        title.read_to_string(&mut content).unwrap();
        assert!(content.contains("incomplete"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn no_staging_file_remains_after_write() {
        let chapter = minimal_chapter();
        let path = std::env::temp_dir().join("talescrape_epub_test_staged.epub");
        write_epub(&chapter, &path, EpubVersion::Epub3, false).unwrap();
        assert!(!staging_path(&path).exists());
        std::fs::remove_file(&path).ok();
    }
}
