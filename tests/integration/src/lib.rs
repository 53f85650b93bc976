//! Shared fixtures for the stratus end-to-end tests.
//!
//! Provides [`MockS3`], a minimal in-process HTTP endpoint that serves
//! canned responses and records every request it sees, plus context
//! builders wiring the stratus core against it.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::Mutex;
use tracing::debug;

use stratus_auth::AwsService;
use stratus_core::{Config, Context, ServiceProfile, SignableRequest};

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// (method, path) pair identifying a route.
type RouteKey = (String, String);

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::status(200)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// One request the endpoint saw, in full.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

struct MockState {
    routes: Mutex<HashMap<RouteKey, MockResponse>>,
    sequences: Mutex<HashMap<RouteKey, VecDeque<MockResponse>>>,
    captured: Mutex<Vec<CapturedRequest>>,
    delay: Mutex<Option<Duration>>,
    shutdown: AtomicBool,
}

/// Minimal single-shot HTTP endpoint: one connection per request,
/// `Connection: close` on every response.
pub struct MockS3 {
    addr: SocketAddr,
    state: Arc<MockState>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl MockS3 {
    /// Bind an ephemeral port and start serving.
    #[must_use]
    pub fn start() -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock endpoint");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(MockState {
            routes: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            captured: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let accept_state = state.clone();
        let accept_thread = thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_state.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let state = accept_state.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &state) {
                        debug!(error = %e, "mock endpoint connection failed");
                    }
                });
            }
        });

        Self {
            addr,
            state,
            accept_thread: Some(accept_thread),
        }
    }

    /// `http://…` endpoint URL for configs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Install a static route; every matching request gets `response`.
    pub fn route(&self, method: &str, path: &str, response: MockResponse) {
        self.state
            .routes
            .lock()
            .insert((method.to_owned(), path.to_owned()), response);
    }

    /// Queue a one-shot response; queued responses win over static routes.
    pub fn push_response(&self, method: &str, path: &str, response: MockResponse) {
        self.state
            .sequences
            .lock()
            .entry((method.to_owned(), path.to_owned()))
            .or_default()
            .push_back(response);
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    /// How many requests matched (method, path), query ignored.
    #[must_use]
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.state
            .captured
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Everything the endpoint has seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.captured.lock().clone()
    }
}

impl Drop for MockS3 {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(mut stream: TcpStream, state: &MockState) -> anyhow::Result<()> {
    let request = read_request(&mut stream)?;
    let key = (request.method.clone(), request.path.clone());

    state.captured.lock().push(request.clone());

    let delay = *state.delay.lock();
    if let Some(delay) = delay {
        thread::sleep(delay);
    }

    let response = state
        .sequences
        .lock()
        .get_mut(&key)
        .and_then(VecDeque::pop_front)
        .or_else(|| state.routes.lock().get(&key).cloned())
        .unwrap_or_else(|| MockResponse::status(404));

    write_response(&mut stream, &request.method, &response)
}

fn read_request(stream: &mut TcpStream) -> anyhow::Result<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            anyhow::bail!("connection closed before headers");
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end])?.to_owned();
    let mut lines = head.split("\r\n");

    let request_line = lines.next().context("missing request line")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing method")?.to_owned();
    let target = parts.next().context("missing target")?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), query.to_owned()),
        None => (target.to_owned(), String::new()),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_owned());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    method: &str,
    response: &MockResponse,
) -> anyhow::Result<()> {
    let reason = match response.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Response",
    };

    let mut out = format!(
        "HTTP/1.1 {} {reason}\r\nConnection: close\r\n",
        response.status
    );

    let has_length = response
        .headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-length"));
    if !has_length {
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }

    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");

    stream.write_all(out.as_bytes())?;
    if method != "HEAD" {
        stream.write_all(&response.body)?;
    }
    stream.flush()?;
    Ok(())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Context builders
// ---------------------------------------------------------------------------

/// Base configuration pointing at the mock endpoint.
#[must_use]
pub fn test_config(server: &MockS3) -> Config {
    Config {
        aws_key: "test".to_owned(),
        aws_secret: "test".to_owned(),
        bucket: "test-0".to_owned(),
        endpoint: server.endpoint(),
        pool_workers: 4,
        ..Config::default()
    }
}

/// Context with the stock AWS profile against the mock endpoint.
#[must_use]
pub fn test_context(server: &MockS3) -> Context {
    test_context_with(server, |_| {})
}

/// Context with config adjustments applied before the profile is built.
pub fn test_context_with(server: &MockS3, adjust: impl FnOnce(&mut Config)) -> Context {
    let mut config = test_config(server);
    adjust(&mut config);
    let service = Arc::new(AwsService::new(&config));
    Context::new(config, service)
}

/// AWS profile with `NextMarker` support switched on, for stores that emit
/// continuation tokens on every truncated page.
pub struct NextMarkerService(pub AwsService);

impl ServiceProfile for NextMarkerService {
    fn header_prefix(&self) -> &str {
        self.0.header_prefix()
    }

    fn meta_header_prefix(&self) -> &str {
        self.0.meta_header_prefix()
    }

    fn url_prefix(&self) -> &str {
        self.0.url_prefix()
    }

    fn bucket_url(&self) -> &str {
        self.0.bucket_url()
    }

    fn is_multipart_upload_supported(&self) -> bool {
        self.0.is_multipart_upload_supported()
    }

    fn is_multipart_download_supported(&self) -> bool {
        self.0.is_multipart_download_supported()
    }

    fn is_next_marker_supported(&self) -> bool {
        true
    }

    fn sign(&self, req: &mut SignableRequest<'_>, last_sign_failed: bool) {
        self.0.sign(req, last_sign_failed);
    }
}

/// Context whose profile reports `NextMarker` support.
#[must_use]
pub fn next_marker_context(server: &MockS3) -> Context {
    let config = test_config(server);
    let service = Arc::new(NextMarkerService(AwsService::new(&config)));
    Context::new(config, service)
}

/// Build a `ListBucketResult` page.
#[must_use]
pub fn list_page(
    truncated: bool,
    next_marker: Option<&str>,
    keys: &[&str],
    prefixes: &[&str],
) -> MockResponse {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
    );

    xml.push_str(&format!("<IsTruncated>{truncated}</IsTruncated>"));
    if let Some(marker) = next_marker {
        xml.push_str(&format!("<NextMarker>{marker}</NextMarker>"));
    }
    for key in keys {
        xml.push_str(&format!("<Contents><Key>{key}</Key></Contents>"));
    }
    for prefix in prefixes {
        xml.push_str(&format!(
            "<CommonPrefixes><Prefix>{prefix}</Prefix></CommonPrefixes>"
        ));
    }
    xml.push_str("</ListBucketResult>");

    MockResponse::ok()
        .with_header("Content-Type", "application/xml")
        .with_body(xml)
}

mod test_request;
