//! Blocking HTTP client with configurable politeness (delay between requests) and retrying fetches.

use crate::scraper::error::ScraperError;
use rand::Rng;
use reqwest::Url;
use std::time::{Duration, Instant, SystemTime};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 2_000;
const MAX_REDIRECTS: usize = 10;

/// Default number of HTTP attempts per fetch (initial plus retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// First backoff delay; doubles after each failed attempt.
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
/// Ceiling on any single backoff delay.
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
/// Larger base after HTTP 429 so the server can recover.
const RATE_LIMIT_BASE_MS: u64 = 5_000;
/// Jitter applied to each backoff delay so concurrent fetches do not retry in lockstep.
const JITTER_FRACTION: f64 = 0.2;

/// A fetched document: final URL after redirects, HTTP status, body, and fetch time.
///
/// Created by [PoliteClient::get_page], parsed on demand by the resolver, then discarded.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: u16,
    pub html: String,
    pub fetched_at: SystemTime,
}

/// Plain-data client configuration. Each worker builds its own client from one
/// of these; the settings themselves are cheap to clone across threads.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// User-Agent header. If unset, a browser-like default is used.
    pub user_agent: Option<String>,
    /// Delay between consecutive requests on the same client.
    pub delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Total HTTP attempts per fetch for transient failures (minimum 1).
    pub max_attempts: u32,
    /// First backoff delay in milliseconds; doubles each retry.
    pub backoff_base_ms: u64,
    /// Ceiling on any backoff delay in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
        }
    }
}

impl ClientSettings {
    /// Build the blocking client and polite wrapper.
    pub fn build(&self) -> Result<PoliteClient, ScraperError> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ScraperError::ClientBuild { source: e })?;
        Ok(PoliteClient {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            last_request: None,
            max_attempts: self.max_attempts.max(1),
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms.max(self.backoff_base_ms),
        })
    }
}

/// Blocking HTTP client that enforces a delay between requests and retries
/// transient failures with capped exponential backoff.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, ScraperError> {
        ClientSettings::default().build()
    }

    /// Perform a single GET request. Sleeps until the configured delay has
    /// passed since the last request; no retries.
    pub fn get(&mut self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        self.wait_delay();
        let response = self.inner.get(url).send();
        self.last_request = Some(Instant::now());
        response
    }

    /// Fetch a page with retries for transient failures.
    ///
    /// Retries on: request timeout, connection errors, HTTP 429, and HTTP 5xx.
    /// Any other non-success status fails immediately. Backoff doubles from
    /// the configured base up to the cap, with jitter; HTTP 429 starts from a
    /// larger base. Returns the page with its final (post-redirect) URL.
    pub fn get_page(&mut self, url: &Url) -> Result<Page, ScraperError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.wait_delay();
            let sent = self.inner.get(url.clone()).send();
            self.last_request = Some(Instant::now());
            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let final_url = response.url().clone();
                        let html = response.text().map_err(|e| ScraperError::BodyRead {
                            url: url.to_string(),
                            source: e,
                        })?;
                        return Ok(Page {
                            url: final_url,
                            status: status.as_u16(),
                            html,
                            fetched_at: SystemTime::now(),
                        });
                    }
                    let rate_limited = status.as_u16() == 429;
                    let retryable = rate_limited || status.is_server_error();
                    if !retryable || attempt >= self.max_attempts {
                        return Err(ScraperError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    }
                    self.sleep_backoff(attempt - 1, rate_limited);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || attempt >= self.max_attempts {
                        return Err(ScraperError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    self.sleep_backoff(attempt - 1, false);
                }
            }
        }
    }

    fn sleep_backoff(&self, retry_index: u32, rate_limited: bool) {
        let base = if rate_limited {
            self.backoff_base_ms.max(RATE_LIMIT_BASE_MS)
        } else {
            self.backoff_base_ms
        };
        let delay = backoff_delay_ms(retry_index, base, self.backoff_cap_ms);
        let jittered = apply_jitter(delay, self.backoff_cap_ms);
        std::thread::sleep(Duration::from_millis(jittered));
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

/// Backoff before retry `retry_index` (0-based): base doubled each retry, capped.
pub(crate) fn backoff_delay_ms(retry_index: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let shift = retry_index.min(16);
    base_ms.saturating_mul(1u64 << shift).min(cap_ms)
}

/// Apply up-to-±20% jitter and re-apply the cap.
fn apply_jitter(delay_ms: u64, cap_ms: u64) -> u64 {
    if delay_ms == 0 {
        return 0;
    }
    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let jittered = (delay_ms as f64 * (1.0 + jitter)).round() as u64;
    jittered.min(cap_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testutil::TestServer;

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            delay_ms: 0,
            max_attempts: 5,
            backoff_base_ms: 1,
            backoff_cap_ms: 8,
            ..ClientSettings::default()
        }
    }

    #[test]
    fn backoff_schedule_is_non_decreasing_and_capped() {
        let cap = 30_000;
        let mut last = 0u64;
        for retry_index in 0..12 {
            let d = backoff_delay_ms(retry_index, 1_000, cap);
            assert!(d >= last, "delay decreased at retry {}", retry_index);
            assert!(d <= cap, "delay exceeded cap at retry {}", retry_index);
            last = d;
        }
        assert_eq!(backoff_delay_ms(0, 1_000, 30_000), 1_000);
        assert_eq!(backoff_delay_ms(1, 1_000, 30_000), 2_000);
        assert_eq!(backoff_delay_ms(5, 1_000, 30_000), 30_000);
    }

    #[test]
    fn jitter_stays_within_bounds_and_cap() {
        for _ in 0..100 {
            let j = apply_jitter(1_000, 30_000);
            assert!((800..=1_200).contains(&j), "jitter out of range: {}", j);
        }
        for _ in 0..100 {
            assert!(apply_jitter(30_000, 30_000) <= 30_000);
        }
        assert_eq!(apply_jitter(0, 30_000), 0);
    }

    #[test]
    fn get_page_retries_503_then_succeeds() {
        let server = TestServer::spawn(|path, hit| match path {
            "/flaky" if hit <= 2 => (503, "busy".to_string()),
            "/flaky" => (200, "<html><body><p>ok</p></body></html>".to_string()),
            _ => (404, "not found".to_string()),
        });
        let mut client = fast_settings().build().unwrap();
        let url = Url::parse(&server.url("/flaky")).unwrap();
        let page = client.get_page(&url).unwrap();
        assert_eq!(page.status, 200);
        assert!(page.html.contains("ok"));
        assert_eq!(server.hits("/flaky"), 3);
    }

    #[test]
    fn get_page_gives_up_after_max_attempts() {
        let server = TestServer::spawn(|_, _| (503, "busy".to_string()));
        let mut settings = fast_settings();
        settings.max_attempts = 3;
        let mut client = settings.build().unwrap();
        let url = Url::parse(&server.url("/down")).unwrap();
        match client.get_page(&url) {
            Err(ScraperError::HttpStatus {
                status, attempts, ..
            }) => {
                assert_eq!(status, 503);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected HttpStatus error, got {:?}", other.map(|p| p.status)),
        }
        assert_eq!(server.hits("/down"), 3);
    }

    #[test]
    fn get_page_404_fails_immediately_without_retry() {
        let server = TestServer::spawn(|_, _| (404, "gone".to_string()));
        let mut client = fast_settings().build().unwrap();
        let url = Url::parse(&server.url("/missing")).unwrap();
        match client.get_page(&url) {
            Err(ScraperError::HttpStatus {
                status, attempts, ..
            }) => {
                assert_eq!(status, 404);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected HttpStatus error, got {:?}", other.map(|p| p.status)),
        }
        assert_eq!(server.hits("/missing"), 1);
    }

    #[test]
    fn get_page_reports_final_url_after_redirect_free_fetch() {
        let server = TestServer::spawn(|_, _| (200, "<p>body</p>".to_string()));
        let mut client = fast_settings().build().unwrap();
        let url = Url::parse(&server.url("/page")).unwrap();
        let page = client.get_page(&url).unwrap();
        assert_eq!(page.url.path(), "/page");
    }
}
