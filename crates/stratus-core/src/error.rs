//! Error types shared across the stratus core.
//!
//! Network and parse failures surface to the caller as typed variants; the
//! syscall adapter maps them onto POSIX `errno` values with [`Error::to_errno`].

/// Core error type for stratus operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection, TLS, or protocol failure from the HTTP client.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request deadline was crossed. The request that timed out is
    /// permanently canceled and must be replaced by its owner.
    #[error("request timed out")]
    Timeout,

    /// A non-2xx HTTP response where a success was required.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// The requested object does not exist (HTTP 404).
    #[error("object not found")]
    NotFound,

    /// Malformed XML or a missing required element in a response body.
    #[error("parse error: {0}")]
    Parse(String),

    /// An argument or state violation on the caller's side.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Local file I/O failure (buffer files, file-backed bodies).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the POSIX `errno` the syscall adapter should
    /// report. Returned values are positive; callers negate as needed.
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Timeout => libc::ETIMEDOUT,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::Transport(_) | Self::HttpStatus(_) | Self::Parse(_) => libc::EIO,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Convenience result type for stratus operations.
pub type Result<T> = std::result::Result<T, Error>;
