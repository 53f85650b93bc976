//! Path-indexed object metadata cache and open-file handle table.
//!
//! One mutex guards both maps and the counters. The lock is never held
//! across network I/O: fetches run on pool workers behind a `Pending`
//! placeholder, and the open/release paths follow a two-phase
//! lock/unlock/lock discipline around the open file's `init` and `cleanup`
//! calls. Lock order is cache state first, then the object; never the
//! reverse.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use stratus_core::{Context, Error, Result};

use crate::object::{Object, ObjectRef, ObjectType};
use crate::open_file::OpenFile;
use crate::pool::WorkerPool;
use crate::request::Method;
use crate::transfer::FileTransfer;

/// Steers the fetch between a directory probe and a file probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheHint {
    /// Probe as a directory first, then as a file.
    #[default]
    None,
    /// Probe as a file only.
    File,
    /// Probe as a directory, falling back to a file.
    Directory,
}

/// Hit/miss/expiry counters, taken under the cache lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expiries: u64,
}

enum CacheSlot {
    /// A fetch is in flight; waiters sleep on the condvar and re-check.
    /// Pending slots are never handed to callers.
    Pending,
    Ready(ObjectRef),
}

struct CacheState {
    cache: HashMap<String, CacheSlot>,
    handles: HashMap<u64, ObjectRef>,
    stats: CacheStats,
    next_handle: u64,
}

/// Path → object map with a secondary handle index.
pub struct ObjectCache {
    ctx: Context,
    pool: Arc<WorkerPool>,
    transfer: Arc<dyn FileTransfer>,
    state: Mutex<CacheState>,
    fetch_done: Condvar,
}

impl ObjectCache {
    #[must_use]
    pub fn new(ctx: Context, pool: Arc<WorkerPool>, transfer: Arc<dyn FileTransfer>) -> Self {
        Self {
            ctx,
            pool,
            transfer,
            state: Mutex::new(CacheState {
                cache: HashMap::new(),
                handles: HashMap::new(),
                stats: CacheStats::default(),
                next_handle: 1,
            }),
            fetch_done: Condvar::new(),
        }
    }

    /// Look up `path`, fetching it on a pool worker on miss or expiry.
    /// Concurrent callers for the same missing path share one fetch.
    ///
    /// # Errors
    ///
    /// `NotFound` when the store reports 404; `HttpStatus`/`Transport`/
    /// `Timeout` for other fetch failures.
    pub fn get(&self, path: &str, hint: CacheHint) -> Result<ObjectRef> {
        loop {
            let mut state = self.state.lock();

            match state.cache.get(path) {
                Some(CacheSlot::Ready(obj)) => {
                    let obj = obj.clone();
                    // An entry with an open file stays pinned past expiry.
                    let usable = {
                        let locked = obj.lock();
                        locked.open_file().is_some() || locked.is_valid()
                    };

                    if usable {
                        state.stats.hits += 1;
                        return Ok(obj);
                    }

                    state.stats.expiries += 1;
                    state.cache.insert(path.to_owned(), CacheSlot::Pending);
                    drop(state);
                    return self.fetch_and_publish(path, hint);
                }
                Some(CacheSlot::Pending) => {
                    self.fetch_done.wait(&mut state);
                }
                None => {
                    state.stats.misses += 1;
                    state.cache.insert(path.to_owned(), CacheSlot::Pending);
                    drop(state);
                    return self.fetch_and_publish(path, hint);
                }
            }
        }
    }

    /// Drop `path` from the cache. An attached open file loses its handle
    /// entry too; buffered writes are abandoned.
    pub fn remove(&self, path: &str) {
        let mut state = self.state.lock();

        let Some(CacheSlot::Ready(obj)) = state.cache.get(path) else {
            return;
        };
        let obj = obj.clone();

        if let Some(file) = obj.lock().open_file() {
            state.handles.remove(&file.get_handle());
        }

        state.cache.remove(path);
    }

    /// The open file backing `handle`, if any.
    #[must_use]
    pub fn get_file(&self, handle: u64) -> Option<Arc<OpenFile>> {
        let state = self.state.lock();
        state
            .handles
            .get(&handle)
            .and_then(|obj| obj.lock().open_file())
    }

    /// Open `path` for I/O, creating or sharing its open file, and return
    /// the handle.
    ///
    /// # Errors
    ///
    /// `NotFound` when the path does not exist; the open file's
    /// initialization error otherwise.
    pub fn open_handle(&self, path: &str) -> Result<u64> {
        let obj = self.get(path, CacheHint::File)?;

        let mut state = self.state.lock();
        let file = obj.lock().open_file();

        let file = match file {
            Some(file) => {
                drop(state);
                file
            }
            None => {
                let handle = state.next_handle;
                state.next_handle += 1;

                let (obj_path, size) = {
                    let locked = obj.lock();
                    (locked.path().to_owned(), locked.stat().size)
                };

                let file = Arc::new(OpenFile::new(
                    self.transfer.clone(),
                    Arc::downgrade(&obj),
                    obj_path,
                    size,
                    handle,
                ));

                obj.lock().set_open_file(Some(file.clone()));

                // The handle must be in the map before unlocking: a
                // concurrent open of the same path blocks in
                // add_reference() and expects to find it on return.
                state.handles.insert(handle, obj.clone());

                drop(state);
                if let Err(e) = file.init() {
                    debug!(path, error = %e, "failed to open file");

                    let mut state = self.state.lock();
                    obj.lock().set_open_file(None);
                    state.handles.remove(&handle);
                    return Err(e);
                }

                file
            }
        };

        file.add_reference()
    }

    /// Release one reference on `handle`. When the count reaches zero the
    /// open file is flushed and the object leaves both maps; the cache
    /// entry stays reachable during the flush so a concurrent opener sees
    /// the closing file instead of racing a half-flushed duplicate.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown handle; the flush error otherwise.
    pub fn release_handle(&self, handle: u64) -> Result<()> {
        let mut state = self.state.lock();

        let Some(obj) = state.handles.get(&handle).cloned() else {
            debug!(handle, "attempt to release handle not in map");
            return Err(Error::InvalidArgument("unknown handle"));
        };

        let Some(file) = obj.lock().open_file() else {
            return Err(Error::InvalidArgument("handle has no open file"));
        };

        if file.release() {
            state.handles.remove(&handle);

            drop(state);
            let flushed = file.cleanup();
            let mut state = self.state.lock();

            let path = obj.lock().path().to_owned();
            state.cache.remove(&path);
            drop(state);

            obj.lock().set_open_file(None);
            flushed?;
        }

        Ok(())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Run the backing fetch and publish the result into the pending slot,
    /// waking every waiter.
    fn fetch_and_publish(&self, path: &str, hint: CacheHint) -> Result<ObjectRef> {
        let result = self.fetch(path, hint);

        {
            let mut state = self.state.lock();
            match &result {
                Ok(obj) => {
                    state
                        .cache
                        .insert(path.to_owned(), CacheSlot::Ready(obj.clone()));
                }
                Err(_) => {
                    state.cache.remove(path);
                }
            }
        }
        self.fetch_done.notify_all();

        result
    }

    fn fetch(&self, path: &str, hint: CacheHint) -> Result<ObjectRef> {
        // The bucket root is synthesized; it has no backing key.
        if path.is_empty() {
            let obj = Object::new_ref(self.ctx.clone(), "");
            obj.lock().set_defaults(ObjectType::Directory);
            return Ok(obj);
        }

        let ctx = self.ctx.clone();
        let path = path.to_owned();

        self.pool.call(move |req| {
            let obj = Object::new_ref(ctx.clone(), &path);

            req.init(Method::Head)?;
            req.set_target_object(obj.clone());

            let mut code = 0;

            if matches!(hint, CacheHint::None | CacheHint::Directory) {
                // Directory probe first: trailing slash.
                req.set_url(&Object::build_url(&ctx, &path, ObjectType::Directory), "");
                req.run()?;
                code = req.response_code();
            }

            if hint == CacheHint::File || code != 200 {
                req.set_url(&Object::build_url(&ctx, &path, ObjectType::File), "");
                req.run()?;
                code = req.response_code();
            }

            match code {
                200 => Ok(obj),
                404 => Err(Error::NotFound),
                code => Err(Error::HttpStatus(code)),
            }
        })
    }
}
