//! Per-file I/O context for open handles.
//!
//! An [`OpenFile`] backs every open handle on one object with an anonymous
//! buffer file: `init` materializes the object's content into it, reads and
//! writes go against it, and `cleanup` flushes dirty content back through
//! the transfer engine once the last reference is released.
//!
//! The file carries its own lock; the object cache never holds its lock
//! across `init` or `cleanup`. Concurrent openers of the same path block in
//! [`OpenFile::add_reference`] until initialization settles.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use stratus_core::{Error, Result};

use crate::object::{unix_now, Object};
use crate::transfer::FileTransfer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitStatus {
    Pending,
    Ready,
    Failed,
}

struct OpenState {
    status: InitStatus,
    refs: u64,
    dirty: bool,
    size: u64,
    file: Option<Arc<File>>,
}

/// Reference-counted I/O context shared by all handles on one object.
pub struct OpenFile {
    handle: u64,
    path: String,
    transfer: Arc<dyn FileTransfer>,
    object: Weak<Mutex<Object>>,
    state: Mutex<OpenState>,
    init_done: Condvar,
}

impl OpenFile {
    /// Create the context for `path` with the object's current size. The
    /// context starts uninitialized; callers must run [`Self::init`] before
    /// any reference can be added.
    #[must_use]
    pub fn new(
        transfer: Arc<dyn FileTransfer>,
        object: Weak<Mutex<Object>>,
        path: String,
        size: u64,
        handle: u64,
    ) -> Self {
        Self {
            handle,
            path,
            transfer,
            object,
            state: Mutex::new(OpenState {
                status: InitStatus::Pending,
                refs: 0,
                dirty: false,
                size,
                file: None,
            }),
            init_done: Condvar::new(),
        }
    }

    #[must_use]
    pub fn get_handle(&self) -> u64 {
        self.handle
    }

    /// Materialize the buffer file. Network-touching; called without any
    /// cache lock held. Waiters blocked in [`Self::add_reference`] are
    /// released whether this succeeds or fails.
    pub fn init(&self) -> Result<()> {
        let result = self.materialize();

        {
            let mut state = self.state.lock();
            match &result {
                Ok(file) => {
                    state.file = Some(file.clone());
                    state.status = InitStatus::Ready;
                }
                Err(e) => {
                    debug!(path = %self.path, error = %e, "open file initialization failed");
                    state.status = InitStatus::Failed;
                }
            }
        }
        self.init_done.notify_all();

        result.map(|_| ())
    }

    fn materialize(&self) -> Result<Arc<File>> {
        let file = Arc::new(tempfile::tempfile()?);
        let size = self.state.lock().size;

        self.transfer.download(&self.path, size, &file)?;
        Ok(file)
    }

    /// Add one reference and return the handle, blocking until
    /// initialization has settled.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if initialization failed.
    pub fn add_reference(&self) -> Result<u64> {
        let mut state = self.state.lock();

        while state.status == InitStatus::Pending {
            self.init_done.wait(&mut state);
        }

        if state.status == InitStatus::Failed {
            return Err(Error::Transport(
                "open file failed to initialize".to_owned(),
            ));
        }

        state.refs += 1;
        Ok(self.handle)
    }

    /// Drop one reference; true when the count reached zero and the caller
    /// must run [`Self::cleanup`].
    #[must_use]
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        state.refs = state.refs.saturating_sub(1);
        state.refs == 0
    }

    /// Flush dirty content back to the store. Network-touching; called with
    /// the cache lock released while the dying cache entry stays reachable.
    pub fn cleanup(&self) -> Result<()> {
        let (file, size, dirty) = {
            let mut state = self.state.lock();
            (state.file.take(), state.size, state.dirty)
        };

        if !dirty {
            return Ok(());
        }

        let Some(file) = file else {
            return Ok(());
        };

        let Some(object) = self.object.upgrade() else {
            debug!(path = %self.path, "object evicted before flush, abandoning writes");
            return Ok(());
        };

        {
            let mut obj = object.lock();
            obj.set_size(size);
            obj.set_mtime(unix_now());
        }

        self.transfer.upload(&object, size, &file)
    }

    /// Read from the buffer file at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = self.buffer_file()?;
        Ok(file.read_at(buf, offset)?)
    }

    /// Write to the buffer file at `offset`, marking the buffer dirty.
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        let file = self.buffer_file()?;
        file.write_all_at(data, offset)?;

        let mut state = self.state.lock();
        state.dirty = true;
        state.size = state.size.max(offset + data.len() as u64);
        Ok(())
    }

    fn buffer_file(&self) -> Result<Arc<File>> {
        self.state
            .lock()
            .file
            .clone()
            .ok_or(Error::InvalidArgument("open file is not initialized"))
    }
}
