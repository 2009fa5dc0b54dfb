//! Test-only HTTP server on an ephemeral port. Handlers are programmable per
//! request and per-path hit counts are recorded for assertions.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub(crate) struct TestServer {
    base_url: String,
    hits: Arc<Mutex<HashMap<String, u32>>>,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    /// Start a server. The handler receives (path-with-query, nth hit for that
    /// path, 1-based) and returns (status, body). Body is served as HTML.
    pub(crate) fn spawn(
        handler: impl Fn(&str, u32) -> (u16, String) + Send + Sync + 'static,
    ) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start test server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let hits: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let hits_in_loop = Arc::clone(&hits);
        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            let path = request.url().to_string();
            let hit = {
                let mut map = hits_in_loop.lock().unwrap();
                let n = map.entry(path.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let (status, body) = handler(&path, hit);
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("content-type header");
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        });

        Self {
            base_url,
            hits,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Absolute URL for a path on this server.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Number of requests served for an exact path (including query).
    pub(crate) fn hits(&self, path: &str) -> u32 {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
