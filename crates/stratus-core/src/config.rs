//! Configuration for the stratus core.
//!
//! All settings are driven by environment variables with sensible defaults,
//! so a mount can be configured entirely from its service environment.

/// Global configuration, initialized at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// AWS access key id.
    pub aws_key: String,
    /// AWS secret access key.
    pub aws_secret: String,
    /// Bucket to mount.
    pub bucket: String,
    /// Endpoint prefix for all requests, e.g. `https://s3.amazonaws.com`.
    pub endpoint: String,
    /// Owner uid reported for objects that carry no uid metadata.
    pub default_uid: u32,
    /// Owner gid reported for objects that carry no gid metadata.
    pub default_gid: u32,
    /// Permission bits reported for objects that carry no mode metadata.
    pub default_mode: u32,
    /// Content type assigned to newly created files.
    pub default_content_type: String,
    /// Seconds a cached object stays valid after a successful fetch.
    pub object_expiry_secs: i64,
    /// Seconds a single request may run before the supervisor cancels it.
    pub request_timeout_secs: i64,
    /// Number of worker threads, each owning one reusable request.
    pub pool_workers: usize,
    /// Log request/response details for every transaction.
    pub verbose_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws_key: String::new(),
            aws_secret: String::new(),
            bucket: String::new(),
            endpoint: "https://s3.amazonaws.com".to_owned(),
            default_uid: 1000,
            default_gid: 1000,
            default_mode: 0o755,
            default_content_type: "binary/octet-stream".to_owned(),
            object_expiry_secs: 3 * 60,
            request_timeout_secs: 30,
            pool_workers: 8,
            verbose_requests: false,
        }
    }
}

impl Config {
    /// Load configuration from `STRATUS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("STRATUS_AWS_KEY") {
            config.aws_key = v;
        }
        if let Ok(v) = std::env::var("STRATUS_AWS_SECRET") {
            config.aws_secret = v;
        }
        if let Ok(v) = std::env::var("STRATUS_BUCKET") {
            config.bucket = v;
        }
        if let Ok(v) = std::env::var("STRATUS_ENDPOINT") {
            config.endpoint = v;
        }
        if let Ok(v) = std::env::var("STRATUS_DEFAULT_UID") {
            config.default_uid = v.parse().unwrap_or(config.default_uid);
        }
        if let Ok(v) = std::env::var("STRATUS_DEFAULT_GID") {
            config.default_gid = v.parse().unwrap_or(config.default_gid);
        }
        if let Ok(v) = std::env::var("STRATUS_DEFAULT_MODE") {
            config.default_mode =
                u32::from_str_radix(v.trim_start_matches("0o"), 8).unwrap_or(config.default_mode);
        }
        if let Ok(v) = std::env::var("STRATUS_OBJECT_EXPIRY_SECS") {
            config.object_expiry_secs = v.parse().unwrap_or(config.object_expiry_secs);
        }
        if let Ok(v) = std::env::var("STRATUS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = v.parse().unwrap_or(config.request_timeout_secs);
        }
        if let Ok(v) = std::env::var("STRATUS_POOL_WORKERS") {
            config.pool_workers = v.parse().unwrap_or(config.pool_workers);
        }
        if let Ok(v) = std::env::var("STRATUS_VERBOSE_REQUESTS") {
            config.verbose_requests = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config
    }
}
