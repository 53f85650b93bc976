//! Core of an S3-backed user-space filesystem: the object metadata cache,
//! open-file handle table, and request pipeline that translate filesystem
//! operations into authenticated HTTP requests and reconcile their results
//! into a POSIX-shaped view.
//!
//! # Architecture
//!
//! ```text
//! syscall adapter (external)
//!        |
//!        v
//!   ObjectCache ──── BucketReader
//!        |                |
//!        v                v
//!    WorkerPool ───── Request ── ServiceProfile (signing, dialect)
//!        |
//!        v
//!  OpenFile / FileTransfer
//! ```
//!
//! A filesystem operation consults the [`cache::ObjectCache`]; on miss a
//! closure runs on the [`pool::WorkerPool`], which hands it a worker-owned
//! [`request::Request`] that populates an [`object::Object`] and inserts it
//! into the cache. Directory reads drive a [`bucket_reader::BucketReader`]
//! through successive requests. File opens allocate a handle backed by an
//! [`open_file::OpenFile`].

pub mod bucket_reader;
pub mod cache;
pub mod object;
pub mod open_file;
pub mod pool;
pub mod request;
pub mod transfer;

pub use bucket_reader::BucketReader;
pub use cache::{CacheHint, CacheStats, ObjectCache};
pub use object::{Object, ObjectRef, ObjectType, Stat};
pub use open_file::OpenFile;
pub use pool::WorkerPool;
pub use request::{Method, Request, TransferWatch};
pub use transfer::{BasicTransfer, FileTransfer};
