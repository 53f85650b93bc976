//! Shared infrastructure for the stratus filesystem core.
//!
//! This crate holds the pieces every other stratus crate depends on: the
//! environment-driven [`Config`], the tagged [`Error`] type with its POSIX
//! `errno` mapping, URL percent-encoding, and the [`ServiceProfile`] contract
//! plus the [`Context`] value that carries profile and configuration into the
//! request pipeline, object cache, and bucket reader.

pub mod config;
pub mod encode;
pub mod error;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{Context, ServiceProfile, SignableRequest};
