//! Stateful paginated listing iterator over a bucket prefix.

use tracing::warn;

use stratus_core::encode::url_encode_query;
use stratus_core::{Context, Error, Result};

use crate::request::{Method, Request};

/// Reads successive pages of a bucket listing until the store reports the
/// result complete. Each call to [`BucketReader::read`] drives one request
/// through the supplied reusable transaction.
pub struct BucketReader {
    ctx: Context,
    prefix: String,
    group_common_prefixes: bool,
    max_keys: usize,
    marker: String,
    truncated: bool,
}

impl BucketReader {
    /// Create an iterator over `prefix`. `group_common_prefixes` requests
    /// delimiter grouping; `max_keys` caps page size, zero for the store's
    /// default.
    #[must_use]
    pub fn new(ctx: Context, prefix: &str, group_common_prefixes: bool, max_keys: usize) -> Self {
        Self {
            ctx,
            prefix: prefix.to_owned(),
            group_common_prefixes,
            max_keys,
            marker: String::new(),
            truncated: true,
        }
    }

    /// Fetch the next page, appending keys to `keys` and grouped prefixes
    /// to `prefixes` when supplied. Returns the number of entries appended,
    /// or zero, without issuing a request, once the listing is exhausted.
    ///
    /// # Errors
    ///
    /// `HttpStatus` for a non-200 response; `Parse` for a malformed page.
    /// On error nothing is appended and the marker does not advance.
    pub fn read(
        &mut self,
        req: &mut Request,
        keys: &mut Vec<String>,
        prefixes: Option<&mut Vec<String>>,
    ) -> Result<usize> {
        if !self.truncated {
            return Ok(0);
        }

        req.init(Method::Get)?;

        let mut query = format!(
            "prefix={}&marker={}",
            url_encode_query(&self.prefix),
            url_encode_query(&self.marker)
        );

        if self.group_common_prefixes {
            query.push_str("&delimiter=/");
        }

        if self.max_keys > 0 {
            query.push_str(&format!("&max-keys={}", self.max_keys));
        }

        req.set_url(self.ctx.service().bucket_url(), &query);
        req.run()?;

        if req.response_code() != 200 {
            return Err(Error::HttpStatus(req.response_code()));
        }

        let page = stratus_xml::parse_list_result(req.output_data()).map_err(|e| {
            warn!(prefix = %self.prefix, error = %e, "failed to parse listing response");
            Error::Parse(e.to_string())
        })?;

        // Resolve the continuation marker before touching any state so a
        // failure leaves the reader where it was.
        let next_marker = if page.is_truncated {
            let marker = if self.ctx.service().is_next_marker_supported() {
                page.next_marker
                    .clone()
                    .ok_or_else(|| Error::Parse("truncated listing without NextMarker".to_owned()))?
            } else {
                page.keys
                    .last()
                    .cloned()
                    .ok_or_else(|| Error::Parse("truncated listing with no keys".to_owned()))?
            };
            Some(marker)
        } else {
            None
        };

        self.truncated = page.is_truncated;
        if let Some(marker) = next_marker {
            self.marker = marker;
        }

        let mut count = page.keys.len();
        keys.extend(page.keys);

        if let Some(prefixes) = prefixes {
            count += page.common_prefixes.len();
            prefixes.extend(page.common_prefixes);
        }

        Ok(count)
    }
}
