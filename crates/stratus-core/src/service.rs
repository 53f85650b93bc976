//! Service-profile contract and the shared request context.
//!
//! A [`ServiceProfile`] answers the dialect questions that vary between
//! S3-compatible stores (header prefixes, URL layout, listing capabilities)
//! and canonicalizes outgoing requests for signing. Everything that consumes
//! one receives it through a [`Context`] at construction time; the context is
//! built once at startup and never mutated afterwards, so reads are
//! lock-free.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;

/// A prepared request handed to the signer: method, unprefixed URL path, and
/// the outgoing header map. The signer writes `Authorization` into the map.
///
/// Headers are kept in a sorted map because canonicalization requires the
/// vendor-prefixed subset in lexicographic order.
pub struct SignableRequest<'a> {
    /// HTTP method, upper-case.
    pub method: &'a str,
    /// URL path without the endpoint prefix, as used in the canonical string.
    pub url: &'a str,
    /// Outgoing headers, sorted by name.
    pub headers: &'a mut BTreeMap<String, String>,
}

/// Dialect-specific settings and capabilities for one S3-compatible store.
pub trait ServiceProfile: Send + Sync {
    /// Vendor header prefix, e.g. `x-amz-`.
    fn header_prefix(&self) -> &str;

    /// User-metadata header prefix, e.g. `x-amz-meta-`.
    fn meta_header_prefix(&self) -> &str;

    /// Endpoint prefix prepended to every request URL.
    fn url_prefix(&self) -> &str;

    /// Root URL path of the mounted bucket, e.g. `/my-bucket`.
    fn bucket_url(&self) -> &str;

    fn is_multipart_upload_supported(&self) -> bool;

    fn is_multipart_download_supported(&self) -> bool;

    /// Whether truncated listings carry a `NextMarker` element. When false,
    /// the caller continues from the last key it received.
    fn is_next_marker_supported(&self) -> bool;

    /// Canonicalize and sign `req`, writing an `Authorization` header.
    /// `last_sign_failed` is set when the previous attempt with the same
    /// credentials was rejected, for profiles that refresh credentials.
    fn sign(&self, req: &mut SignableRequest<'_>, last_sign_failed: bool);
}

/// Shared, immutable context handed to every component at construction.
#[derive(Clone)]
pub struct Context {
    config: Arc<Config>,
    service: Arc<dyn ServiceProfile>,
}

impl Context {
    /// Build a context from a loaded configuration and a service profile.
    pub fn new(config: Config, service: Arc<dyn ServiceProfile>) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn service(&self) -> &dyn ServiceProfile {
        self.service.as_ref()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("bucket", &self.config.bucket)
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}
