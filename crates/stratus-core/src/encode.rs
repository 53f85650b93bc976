//! Percent-encoding for object URLs and query strings.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except unreserved characters and `/` is escaped. Path
/// separators pass through so keys encode segment by segment.
const URL_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Everything except unreserved characters is escaped, `/` included. Used
/// for query-string values, where a separator must not survive unescaped.
const URL_QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a URL path, leaving `/` separators intact.
#[must_use]
pub fn url_encode(path: &str) -> String {
    utf8_percent_encode(path, URL_PATH).to_string()
}

/// Percent-encode a query-string value.
#[must_use]
pub fn url_encode_query(value: &str) -> String {
    utf8_percent_encode(value, URL_QUERY).to_string()
}
