//! File-transfer engine seam.
//!
//! The open-file lifecycle delegates content I/O to a [`FileTransfer`]
//! implementation. [`BasicTransfer`] ships the single-request paths: a GET
//! streamed into the buffer file and a PUT streamed out of it, both running
//! on pool workers. Multipart engines plug in behind the same trait.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use tracing::debug;

use stratus_core::{Context, Error, Result};

use crate::object::{Object, ObjectRef, ObjectType};
use crate::pool::WorkerPool;
use crate::request::Method;

/// Moves object content between the store and a local buffer file.
pub trait FileTransfer: Send + Sync {
    /// Fetch `size` bytes of `path` into `dest`, starting at offset zero.
    fn download(&self, path: &str, size: u64, dest: &Arc<File>) -> Result<()>;

    /// Store `size` bytes from `src` as the object's new content, updating
    /// the object's digest from the response.
    fn upload(&self, obj: &ObjectRef, size: u64, src: &Arc<File>) -> Result<()>;
}

/// Single-request transfer engine.
pub struct BasicTransfer {
    ctx: Context,
    pool: Arc<WorkerPool>,
}

impl BasicTransfer {
    #[must_use]
    pub fn new(ctx: Context, pool: Arc<WorkerPool>) -> Self {
        debug!(
            multipart_upload = ctx.service().is_multipart_upload_supported(),
            multipart_download = ctx.service().is_multipart_download_supported(),
            "single-request transfer engine initialized"
        );

        Self { ctx, pool }
    }
}

impl FileTransfer for BasicTransfer {
    fn download(&self, path: &str, size: u64, dest: &Arc<File>) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        let url = Object::build_url(&self.ctx, path, ObjectType::File);
        let dest = dest.clone();

        self.pool.call(move |req| {
            req.init(Method::Get)?;
            req.set_url(&url, "");
            req.set_output_file(dest, 0);
            req.run()?;

            match req.response_code() {
                200 => Ok(()),
                404 => Err(Error::NotFound),
                code => Err(Error::HttpStatus(code)),
            }
        })
    }

    fn upload(&self, obj: &ObjectRef, size: u64, src: &Arc<File>) -> Result<()> {
        let (md5_hex, md5_b64) = file_md5(src, size)?;

        let obj = obj.clone();
        let src = src.clone();

        self.pool.call(move |req| {
            req.init(Method::Put)?;

            let url = {
                let locked = obj.lock();
                req.set_meta_headers(&locked);
                locked.url().to_owned()
            };

            req.set_url(&url, "");
            req.set_header("Content-MD5", md5_b64);
            req.set_input_file(src, size, 0)?;
            req.run()?;

            match req.response_code() {
                200 => {
                    let etag = req.response_header("etag").unwrap_or_default().to_owned();
                    obj.lock().set_md5(md5_hex, etag);
                    Ok(())
                }
                code => Err(Error::HttpStatus(code)),
            }
        })
    }
}

/// Content MD5 of the first `size` bytes of `file`, as a hex string and the
/// Base64 digest the `Content-MD5` header wants.
fn file_md5(file: &Arc<File>, size: u64) -> Result<(String, String)> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    let mut offset = 0u64;

    while offset < size {
        let want = (buf.len() as u64).min(size - offset) as usize;
        let n = file.read_at(&mut buf[..want], offset)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    Ok((hex, BASE64.encode(digest)))
}
