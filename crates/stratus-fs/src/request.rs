//! One reusable HTTP transaction.
//!
//! A [`Request`] is bound for its lifetime to one HTTP client, so connection
//! pooling and TLS session reuse persist across runs. Worker threads each
//! own exactly one request and hand it to closures submitted to the pool.
//!
//! Cancellation is cooperative: a [`TransferWatch`] shared with the pool
//! supervisor carries the deadline, and streaming reads and writes abort as
//! soon as the sticky canceled flag flips. A canceled request is terminal
//! and must be replaced by its owner.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use stratus_core::{Context, Error, Result, SignableRequest};

use crate::object::{Object, ObjectRef};

const STREAM_CHUNK: usize = 16 * 1024;

/// HTTP methods supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Put => reqwest::Method::PUT,
            Self::Post => reqwest::Method::POST,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Deadline and cancellation state for one request, shared with the pool
/// supervisor so timeouts fire while a transfer is in flight.
#[derive(Debug, Default)]
pub struct TransferWatch {
    canceled: AtomicBool,
    deadline: Mutex<Option<Instant>>,
}

impl TransferWatch {
    /// Cancel if the deadline has been crossed. Returns true when this call
    /// (or an earlier one) canceled the transfer.
    pub fn check_timeout(&self) -> bool {
        if let Some(deadline) = *self.deadline.lock() {
            if Instant::now() > deadline {
                debug!("request deadline crossed, canceling");
                self.canceled.store(true, Ordering::SeqCst);
                return true;
            }
        }

        self.is_canceled()
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn set_deadline(&self, deadline: Instant) {
        *self.deadline.lock() = Some(deadline);
    }

    fn clear_deadline(&self) {
        *self.deadline.lock() = None;
    }
}

enum InputSource {
    None,
    Data(Bytes),
    File {
        file: Arc<File>,
        offset: u64,
        size: u64,
    },
}

enum OutputSink {
    Buffer,
    File { file: Arc<File>, offset: u64 },
}

/// Upload body that respects cancellation by failing the next read.
struct CancelableSource {
    watch: Arc<TransferWatch>,
    kind: SourceKind,
}

enum SourceKind {
    Data { data: Bytes, pos: usize },
    File { file: Arc<File>, offset: u64, remaining: u64 },
}

impl Read for CancelableSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.watch.check_timeout() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "transfer canceled",
            ));
        }

        match &mut self.kind {
            SourceKind::Data { data, pos } => {
                let n = buf.len().min(data.len() - *pos);
                buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            SourceKind::File {
                file,
                offset,
                remaining,
            } => {
                let want = (buf.len() as u64).min(*remaining) as usize;
                if want == 0 {
                    return Ok(0);
                }
                let n = file.read_at(&mut buf[..want], *offset)?;
                *offset += n as u64;
                *remaining -= n as u64;
                Ok(n)
            }
        }
    }
}

/// One reusable HTTP transaction.
pub struct Request {
    ctx: Context,
    client: reqwest::blocking::Client,
    watch: Arc<TransferWatch>,
    method: Option<Method>,
    url: String,
    full_url: String,
    headers: BTreeMap<String, String>,
    input: InputSource,
    output: OutputSink,
    output_data: Vec<u8>,
    response_headers: BTreeMap<String, String>,
    response_code: u16,
    last_modified: i64,
    target: Option<ObjectRef>,
    run_count: u64,
    total_run_time: Duration,
}

impl Request {
    /// Create a request with its own long-lived HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the client cannot be constructed.
    pub fn new(ctx: Context) -> Result<Self> {
        let timeout = Duration::from_secs(ctx.config().request_timeout_secs.max(1) as u64);

        // The client-level timeout is a transport backstop for phases with
        // no streaming callbacks (connect, header wait); mid-transfer
        // cancellation comes from the watch.
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            ctx,
            client,
            watch: Arc::new(TransferWatch::default()),
            method: None,
            url: String::new(),
            full_url: String::new(),
            headers: BTreeMap::new(),
            input: InputSource::None,
            output: OutputSink::Buffer,
            output_data: Vec::new(),
            response_headers: BTreeMap::new(),
            response_code: 0,
            last_modified: 0,
            target: None,
            run_count: 0,
            total_run_time: Duration::ZERO,
        })
    }

    /// Reset all transient state for a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this request was canceled; canceled
    /// requests are terminal.
    pub fn init(&mut self, method: Method) -> Result<()> {
        if self.watch.is_canceled() {
            return Err(Error::InvalidArgument("cannot reuse a canceled request"));
        }

        self.method = Some(method);
        self.url.clear();
        self.full_url.clear();
        self.headers.clear();
        self.input = InputSource::None;
        self.output = OutputSink::Buffer;
        self.output_data.clear();
        self.response_headers.clear();
        self.response_code = 0;
        self.last_modified = 0;
        self.target = None;

        Ok(())
    }

    /// Compose the target URL from the unprefixed `path` and an optional
    /// query string. The unprefixed path is what gets signed.
    pub fn set_url(&mut self, path: &str, query: &str) {
        let mut full = format!("{}{}", self.ctx.service().url_prefix(), path);

        if !query.is_empty() {
            full.push(if full.contains('?') { '&' } else { '?' });
            full.push_str(query);
        }

        self.url = path.to_owned();
        self.full_url = full;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Stamp the object's metadata headers onto this request.
    pub fn set_meta_headers(&mut self, obj: &Object) {
        for (name, value) in obj.meta_headers() {
            self.set_header(name, value);
        }
    }

    /// Use an in-memory upload body. Only PUT and POST may carry one.
    pub fn set_input_data(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();

        if !data.is_empty() && !self.is_upload_method() {
            return Err(Error::InvalidArgument(
                "request body requires PUT or POST",
            ));
        }

        self.input = InputSource::Data(data);
        Ok(())
    }

    /// Use a file-backed upload body read at `offset` for `size` bytes.
    pub fn set_input_file(&mut self, file: Arc<File>, size: u64, offset: u64) -> Result<()> {
        if size > 0 && !self.is_upload_method() {
            return Err(Error::InvalidArgument(
                "request body requires PUT or POST",
            ));
        }

        self.input = InputSource::File { file, offset, size };
        Ok(())
    }

    /// Write the response body to `file` starting at `offset` instead of
    /// buffering it in memory.
    pub fn set_output_file(&mut self, file: Arc<File>, offset: u64) {
        self.output = OutputSink::File { file, offset };
    }

    /// Stream response headers into `obj` and finalize it when the
    /// transaction completes.
    pub fn set_target_object(&mut self, obj: ObjectRef) {
        self.target = Some(obj);
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    /// Server-reported last-modified time, seconds since the epoch.
    #[must_use]
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// Buffered response body (empty when a file sink was set).
    #[must_use]
    pub fn output_data(&self) -> &[u8] {
        &self.output_data
    }

    /// Buffered response header by lowercase name, when no target object
    /// consumed the headers.
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name).map(String::as_str)
    }

    /// Shared deadline/cancellation handle for the pool supervisor.
    #[must_use]
    pub fn watch(&self) -> Arc<TransferWatch> {
        self.watch.clone()
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.watch.is_canceled()
    }

    /// Cancel if the deadline has been crossed.
    pub fn check_timeout(&self) -> bool {
        self.watch.check_timeout()
    }

    /// Mean run time, excluding the first run (connection and TLS warmup
    /// skew it).
    #[must_use]
    pub fn average_run_time(&self) -> Duration {
        if self.run_count > 1 {
            self.total_run_time / (self.run_count - 1) as u32
        } else {
            Duration::ZERO
        }
    }

    fn is_upload_method(&self) -> bool {
        matches!(self.method, Some(Method::Put | Method::Post))
    }

    /// Perform the transaction.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing init/url or a canceled request;
    /// `Timeout` when the deadline was crossed; `Transport` for client
    /// failures. A non-2xx response is not an error here; callers inspect
    /// [`Self::response_code`].
    pub fn run(&mut self) -> Result<()> {
        let method = self
            .method
            .ok_or(Error::InvalidArgument("call init() first"))?;

        if self.url.is_empty() {
            return Err(Error::InvalidArgument("call set_url() first"));
        }

        if self.watch.is_canceled() {
            return Err(Error::InvalidArgument("cannot reuse a canceled request"));
        }

        self.output_data.clear();
        self.response_headers.clear();

        self.headers.insert(
            "Date".to_owned(),
            chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        );

        {
            let mut signable = SignableRequest {
                method: method.as_str(),
                url: &self.url,
                headers: &mut self.headers,
            };
            self.ctx.service().sign(&mut signable, false);
        }

        if let Some(target) = &self.target {
            target.lock().request_init();
        }

        let started = Instant::now();
        let timeout = Duration::from_secs(self.ctx.config().request_timeout_secs.max(1) as u64);
        self.watch.set_deadline(started + timeout);

        let result = self.dispatch(method);

        self.watch.clear_deadline();
        result?;

        let elapsed = started.elapsed();

        // Skip the first run when accumulating; it's disproportionately
        // expensive and would skew the average.
        if self.run_count > 0 {
            self.total_run_time += elapsed;
        }
        self.run_count += 1;

        if self.response_code >= 300 && self.response_code != 404 {
            debug!(
                url = %self.url,
                code = self.response_code,
                body = %String::from_utf8_lossy(&self.output_data),
                "request failed"
            );
        }

        if let Some(target) = &self.target {
            target
                .lock()
                .request_process_response(&self.url, self.response_code, self.last_modified);
        }

        Ok(())
    }

    fn dispatch(&mut self, method: Method) -> Result<()> {
        let mut builder = self.client.request(method.to_reqwest(), &self.full_url);

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match &self.input {
            InputSource::None => {}
            InputSource::Data(data) => {
                let source = CancelableSource {
                    watch: self.watch.clone(),
                    kind: SourceKind::Data {
                        data: data.clone(),
                        pos: 0,
                    },
                };
                builder =
                    builder.body(reqwest::blocking::Body::sized(source, data.len() as u64));
            }
            InputSource::File { file, offset, size } => {
                let source = CancelableSource {
                    watch: self.watch.clone(),
                    kind: SourceKind::File {
                        file: file.clone(),
                        offset: *offset,
                        remaining: *size,
                    },
                };
                builder = builder.body(reqwest::blocking::Body::sized(source, *size));
            }
        }

        let mut response = builder.send().map_err(|e| self.map_transport_error(&e))?;

        self.response_code = response.status().as_u16();
        self.last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
            .map_or(0, |dt| dt.timestamp());

        // Header names arrive lowercased from the HTTP stack.
        if let Some(target) = &self.target {
            let mut obj = target.lock();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    obj.request_process_header(name.as_str(), value);
                }
            }
        } else {
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    self.response_headers
                        .insert(name.as_str().to_owned(), value.to_owned());
                }
            }
        }

        let mut chunk = [0u8; STREAM_CHUNK];
        loop {
            if self.watch.check_timeout() {
                return Err(Error::Timeout);
            }

            let n = match response.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if self.watch.is_canceled() => {
                    debug!(url = %self.url, error = %e, "transfer canceled mid-body");
                    return Err(Error::Timeout);
                }
                Err(e) => return Err(Error::Transport(e.to_string())),
            };

            if n == 0 {
                break;
            }

            match &mut self.output {
                OutputSink::Buffer => self.output_data.extend_from_slice(&chunk[..n]),
                OutputSink::File { file, offset } => {
                    file.write_all_at(&chunk[..n], *offset)?;
                    *offset += n as u64;
                }
            }
        }

        if self.watch.is_canceled() {
            return Err(Error::Timeout);
        }

        Ok(())
    }

    fn map_transport_error(&self, e: &reqwest::Error) -> Error {
        if self.watch.is_canceled() {
            return Error::Timeout;
        }

        if e.is_timeout() {
            // Client-level backstop fired; the request is terminal exactly
            // as if the supervisor had canceled it.
            self.watch.cancel();
            return Error::Timeout;
        }

        Error::Transport(e.to_string())
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.run_count > 0 {
            debug!(
                runs = self.run_count,
                avg_ms = self.average_run_time().as_millis() as u64,
                "request retired"
            );
        }
    }
}
