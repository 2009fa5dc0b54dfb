//! Optional config file loading. Search order: ./talescrape.toml, then
//! $XDG_CONFIG_HOME/talescrape/config.toml (or ~/.config/talescrape/config.toml).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Delay in seconds between requests on one worker.
    pub request_delay_secs: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts per fetch for transient failures (default 4).
    pub max_retries: Option<u32>,
    /// First retry backoff delay in milliseconds; doubles each retry (default 1000).
    pub retry_base_delay_ms: Option<u64>,
    /// Simultaneous story workers for index runs (default 3).
    pub max_concurrency: Option<usize>,
    /// Hard cap on pages per chapter (default 500).
    pub max_pages: Option<usize>,
    /// Hard cap on listing pages per index (default 50).
    pub max_index_pages: Option<usize>,
    /// Nested-index recursion bound (default 2).
    pub index_depth: Option<usize>,
    /// Minimum paragraphs for a body heuristic to match (default 2).
    pub min_paragraphs: Option<usize>,
    /// Minimum characters per paragraph (default 12).
    pub min_paragraph_chars: Option<usize>,
}

/// Search order: (1) ./talescrape.toml, (2) $XDG_CONFIG_HOME/talescrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("talescrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("talescrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.request_delay_secs.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.max_retries.is_none());
        assert!(c.retry_base_delay_ms.is_none());
        assert!(c.max_concurrency.is_none());
        assert!(c.max_pages.is_none());
        assert!(c.max_index_pages.is_none());
        assert!(c.index_depth.is_none());
        assert!(c.min_paragraphs.is_none());
        assert!(c.min_paragraph_chars.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "downloads"
            user_agent = "Custom/1.0"
            request_delay_secs = 3
            timeout_secs = 60
            max_retries = 5
            retry_base_delay_ms = 500
            max_concurrency = 4
            max_pages = 200
            max_index_pages = 20
            index_depth = 1
            min_paragraphs = 3
            min_paragraph_chars = 20
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(
            c.output_dir.as_deref(),
            Some(std::path::Path::new("downloads"))
        );
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.request_delay_secs, Some(3));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.max_retries, Some(5));
        assert_eq!(c.retry_base_delay_ms, Some(500));
        assert_eq!(c.max_concurrency, Some(4));
        assert_eq!(c.max_pages, Some(200));
        assert_eq!(c.max_index_pages, Some(20));
        assert_eq!(c.index_depth, Some(1));
        assert_eq!(c.min_paragraphs, Some(3));
        assert_eq!(c.min_paragraph_chars, Some(20));
    }

    #[test]
    fn parse_partial_config() {
        let s = r#"
            request_delay_secs = 1
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert_eq!(c.request_delay_secs, Some(1));
        assert!(c.timeout_secs.is_none());
        assert!(c.max_concurrency.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
    }
}
