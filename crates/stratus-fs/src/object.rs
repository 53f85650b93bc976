//! In-memory representation of one bucket object.
//!
//! An [`Object`] carries the metadata view of a single key: its POSIX stat
//! projection, content type, digests, and user metadata. It is populated by
//! the request pipeline: `request_init` wipes it, response headers stream in
//! through `request_process_header`, and `request_process_response` finalizes
//! type, mode, size, and mtime and stamps the expiry that makes the entry
//! valid.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use stratus_core::encode::url_encode;
use stratus_core::{Context, Error, Result};

use crate::open_file::OpenFile;

/// Namespace, under the vendor metadata prefix, reserved for the stat
/// projection. Never exposed through the user metadata map.
pub const RESERVED_META_PREFIX: &str = "stratus-";

/// Content type marking an object as a symlink.
pub const SYMLINK_CONTENT_TYPE: &str = "text/symlink";

const BLOCK_SIZE: u64 = 512;

/// Shared handle to a cached object. The cache lock is never held while a
/// network call runs against the object, so all mutation goes through this
/// per-object mutex.
pub type ObjectRef = Arc<Mutex<Object>>;

/// What kind of filesystem entity an object maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    /// Not yet populated from a response.
    #[default]
    Invalid,
    File,
    Directory,
    Symlink,
}

impl ObjectType {
    /// The `S_IFMT` bits for this type.
    #[must_use]
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::File => libc::S_IFREG,
            Self::Directory => libc::S_IFDIR,
            Self::Symlink => libc::S_IFLNK,
            Self::Invalid => 0,
        }
    }
}

/// POSIX-shaped stat record projected from object metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    /// File type and permission bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Content length in bytes.
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub nlink: u32,
    /// 512-byte blocks, for files only.
    pub blocks: u64,
}

/// One named entity in the bucket.
pub struct Object {
    ctx: Context,
    path: String,
    object_type: ObjectType,
    url: String,
    stat: Stat,
    content_type: String,
    etag: String,
    mtime_etag: String,
    md5: String,
    md5_etag: String,
    metadata: BTreeMap<String, String>,
    /// Wall-clock instant (seconds) after which this entry is stale.
    /// Zero means the object has never been populated.
    expiry: i64,
    open_file: Option<Arc<OpenFile>>,
}

impl Object {
    /// Create an uninitialized object for `path`.
    #[must_use]
    pub fn new(ctx: Context, path: &str) -> Self {
        Self {
            ctx,
            path: path.to_owned(),
            object_type: ObjectType::Invalid,
            url: String::new(),
            stat: Stat::default(),
            content_type: String::new(),
            etag: String::new(),
            mtime_etag: String::new(),
            md5: String::new(),
            md5_etag: String::new(),
            metadata: BTreeMap::new(),
            expiry: 0,
            open_file: None,
        }
    }

    /// Create a shared, uninitialized object for `path`.
    #[must_use]
    pub fn new_ref(ctx: Context, path: &str) -> ObjectRef {
        Arc::new(Mutex::new(Self::new(ctx, path)))
    }

    /// Build the URL for `path`: bucket root, percent-encoded path, and a
    /// trailing `/` iff the object is a directory.
    #[must_use]
    pub fn build_url(ctx: &Context, path: &str, object_type: ObjectType) -> String {
        format!(
            "{}/{}{}",
            ctx.service().bucket_url(),
            url_encode(path),
            if object_type == ObjectType::Directory {
                "/"
            } else {
                ""
            }
        )
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        self.stat
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn etag(&self) -> &str {
        &self.etag
    }

    #[must_use]
    pub fn md5(&self) -> &str {
        &self.md5
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    /// Whether this entry is populated and not yet stale.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expiry > unix_now()
    }

    #[must_use]
    pub fn open_file(&self) -> Option<Arc<OpenFile>> {
        self.open_file.clone()
    }

    pub fn set_open_file(&mut self, file: Option<Arc<OpenFile>>) {
        self.open_file = file;
    }

    /// Initialize every field to its default for a freshly created object of
    /// the given type, making the entry valid without a round trip.
    pub fn set_defaults(&mut self, object_type: ObjectType) {
        let config = self.ctx.config();

        self.stat = Stat {
            mode: config.default_mode | object_type.mode_bits(),
            uid: config.default_uid,
            gid: config.default_gid,
            size: 0,
            mtime: unix_now(),
            nlink: 1,
            blocks: 0,
        };

        self.object_type = object_type;
        self.content_type = if object_type == ObjectType::Symlink {
            SYMLINK_CONTENT_TYPE.to_owned()
        } else {
            config.default_content_type.clone()
        };
        self.etag.clear();
        self.mtime_etag.clear();
        self.md5.clear();
        self.md5_etag.clear();
        self.expiry = unix_now() + config.object_expiry_secs;
        self.metadata.clear();
        self.url = Self::build_url(&self.ctx, &self.path, object_type);
    }

    /// Store a user metadata entry. Keys under the reserved namespace are
    /// rejected with `InvalidArgument`.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        if key.starts_with(RESERVED_META_PREFIX) {
            return Err(Error::InvalidArgument("metadata key is reserved"));
        }

        self.metadata.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    /// Set the permission bits, keeping the file-type bits. A zero mode is
    /// replaced with the configured default.
    pub fn set_mode(&mut self, mode: u32) {
        let mut mode = mode & !libc::S_IFMT;

        if mode == 0 {
            mode = self.ctx.config().default_mode;
        }

        self.stat.mode = (self.stat.mode & libc::S_IFMT) | mode;
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.stat.uid = uid;
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.stat.gid = gid;
    }

    pub fn set_mtime(&mut self, mtime: i64) {
        self.stat.mtime = mtime;
    }

    pub fn set_size(&mut self, size: u64) {
        self.stat.size = size;

        if self.object_type == ObjectType::File {
            self.stat.blocks = size.div_ceil(BLOCK_SIZE);
        }
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.content_type = content_type.to_owned();
    }

    /// Record the content digest observed at upload time, along with the
    /// ETag the store returned for it.
    pub fn set_md5(&mut self, md5: String, etag: String) {
        self.md5 = md5;
        self.md5_etag.clone_from(&etag);
        self.etag = etag;
    }

    /// Wipe all transient state ahead of header ingestion.
    pub fn request_init(&mut self) {
        self.stat = Stat::default();
        self.object_type = ObjectType::Invalid;
        self.content_type.clear();
        self.etag.clear();
        self.mtime_etag.clear();
        self.md5.clear();
        self.md5_etag.clear();
        self.expiry = 0;
        self.metadata.clear();
        self.url.clear();
    }

    /// Ingest one response header. Names arrive lowercased from the HTTP
    /// stack; matching is on the lowercase form.
    pub fn request_process_header(&mut self, name: &str, value: &str) {
        let long_value = parse_header_int(value);

        match name {
            "content-type" => self.content_type = value.to_owned(),
            "etag" => self.etag = value.to_owned(),
            "content-length" => self.stat.size = long_value.max(0) as u64,
            _ => {
                let Some(meta_key) = name.strip_prefix(self.ctx.service().meta_header_prefix())
                else {
                    return;
                };

                if let Some(field) = meta_key.strip_prefix(RESERVED_META_PREFIX) {
                    match field {
                        "mode" => self.stat.mode = (long_value as u32) & !libc::S_IFMT,
                        "uid" => self.stat.uid = long_value.max(0) as u32,
                        "gid" => self.stat.gid = long_value.max(0) as u32,
                        "mtime" => self.stat.mtime = long_value,
                        "mtime-etag" => self.mtime_etag = value.to_owned(),
                        "md5" => self.md5 = value.to_owned(),
                        "md5-etag" => self.md5_etag = value.to_owned(),
                        // Unknown reserved headers never reach the user map.
                        _ => {}
                    }
                } else {
                    self.metadata.insert(meta_key.to_owned(), value.to_owned());
                }
            }
        }
    }

    /// Finalize the object after a completed transaction. `request_url` is
    /// the URL the succeeding probe actually hit; a trailing `/` marks a
    /// directory. Only an HTTP 200 with a non-empty URL populates anything.
    pub fn request_process_response(
        &mut self,
        request_url: &str,
        response_code: u16,
        last_modified: i64,
    ) {
        if request_url.is_empty() || response_code != 200 {
            return;
        }

        self.object_type = if request_url.ends_with('/') {
            ObjectType::Directory
        } else if self.content_type == SYMLINK_CONTENT_TYPE {
            ObjectType::Symlink
        } else {
            ObjectType::File
        };

        self.url = Self::build_url(&self.ctx, &self.path, self.object_type);

        let config = self.ctx.config();

        if self.stat.mode == 0 {
            self.stat.mode = config.default_mode;
        }
        if self.stat.uid == 0 {
            self.stat.uid = config.default_uid;
        }
        if self.stat.gid == 0 {
            self.stat.gid = config.default_gid;
        }

        self.stat.mode |= self.object_type.mode_bits();
        self.stat.nlink = 1;

        // The object may have been updated by another writer that never set
        // the mtime header; fall back to the server's last-modified.
        if self.mtime_etag != self.etag && last_modified > self.stat.mtime {
            self.stat.mtime = last_modified;
        }

        self.mtime_etag.clone_from(&self.etag);

        // Multipart uploads don't get an MD5-shaped ETag.
        if !is_valid_md5(&self.md5) {
            self.md5.clear();
        }

        if (self.md5_etag != self.etag || self.md5.is_empty()) && is_valid_md5(&self.etag) {
            self.md5 = strip_etag_quotes(&self.etag).to_owned();
        }

        self.md5_etag.clone_from(&self.etag);

        if self.object_type == ObjectType::File {
            self.stat.blocks = self.stat.size.div_ceil(BLOCK_SIZE);
        }

        // Setting expiry > 0 is what makes this object valid.
        self.expiry = unix_now() + config.object_expiry_secs;
    }

    /// Outgoing metadata headers, user entries first so the reserved keys
    /// overwrite any collisions, then the stat projection and Content-Type.
    #[must_use]
    pub fn meta_headers(&self) -> Vec<(String, String)> {
        let meta_prefix = self.ctx.service().meta_header_prefix();
        let reserved = |field: &str| format!("{meta_prefix}{RESERVED_META_PREFIX}{field}");

        let mut headers = Vec::with_capacity(self.metadata.len() + 8);

        for (key, value) in &self.metadata {
            headers.push((format!("{meta_prefix}{key}"), value.clone()));
        }

        headers.push((reserved("mode"), format_octal(self.stat.mode & !libc::S_IFMT)));
        headers.push((reserved("uid"), self.stat.uid.to_string()));
        headers.push((reserved("gid"), self.stat.gid.to_string()));
        headers.push((reserved("mtime"), self.stat.mtime.to_string()));
        headers.push((reserved("mtime-etag"), self.mtime_etag.clone()));
        headers.push((reserved("md5"), self.md5.clone()));
        headers.push((reserved("md5-etag"), self.md5_etag.clone()));
        headers.push(("Content-Type".to_owned(), self.content_type.clone()));

        headers
    }
}

/// Seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse an integer header value with `strtol(_, _, 0)` semantics: a leading
/// `0x` means hex, a leading `0` means octal, anything unparsable is zero.
/// The mode header round-trips through this as `%#o`-style octal.
fn parse_header_int(value: &str) -> i64 {
    let s = value.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse()
    };

    match parsed {
        Ok(v) if negative => -v,
        Ok(v) => v,
        Err(_) => 0,
    }
}

/// Format permission bits the way `%#o` does: `0755`, with plain `0` for zero.
fn format_octal(mode: u32) -> String {
    if mode == 0 {
        "0".to_owned()
    } else {
        format!("0{mode:o}")
    }
}

/// Strip the surrounding quotes an ETag carries on the wire.
fn strip_etag_quotes(etag: &str) -> &str {
    etag.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(etag)
}

/// Whether `s` is a syntactically valid MD5: 32 hex digits, optionally
/// quoted ETag-style.
fn is_valid_md5(s: &str) -> bool {
    let hex = strip_etag_quotes(s);
    hex.len() == 32 && hex.bytes().all(|b| b.is_ascii_hexdigit())
}
