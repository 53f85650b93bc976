//! AWS Signature Version 2 request signing.
//!
//! SigV2 uses HMAC-SHA1 over a canonical string. The `Authorization` header
//! has the format:
//!
//! ```text
//! AWS <AWSAccessKeyId>:<Signature>
//! ```
//!
//! Where `Signature = Base64(HMAC-SHA1(SecretKey, StringToSign))` and:
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Date + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::debug;

use stratus_core::SignableRequest;

type HmacSha1 = Hmac<Sha1>;

/// Signs outgoing requests with a fixed access-key pair.
#[derive(Clone)]
pub struct Sigv2Signer {
    access_key_id: String,
    secret_key: String,
    header_prefix: String,
}

impl Sigv2Signer {
    /// Create a signer for the given credentials and vendor header prefix
    /// (e.g. `x-amz-`).
    #[must_use]
    pub fn new(access_key_id: String, secret_key: String, header_prefix: String) -> Self {
        Self {
            access_key_id,
            secret_key,
            header_prefix,
        }
    }

    /// Canonicalize `req` and write its `Authorization` header.
    pub fn sign(&self, req: &mut SignableRequest<'_>) {
        let string_to_sign = self.build_string_to_sign(req);

        debug!(string_to_sign = ?string_to_sign, "built SigV2 string to sign");

        let signature = compute_signature(&self.secret_key, &string_to_sign);

        req.headers.insert(
            "Authorization".to_owned(),
            format!("AWS {}:{signature}", self.access_key_id),
        );
    }

    /// Build the SigV2 string to sign.
    ///
    /// The vendor-prefixed headers are emitted sorted by name, one per line
    /// as `name:value`; empty values are skipped. The resource is the
    /// unprefixed URL path.
    fn build_string_to_sign(&self, req: &SignableRequest<'_>) -> String {
        let mut to_sign = format!(
            "{}\n{}\n{}\n{}\n",
            req.method,
            header_value(req.headers, "Content-MD5"),
            header_value(req.headers, "Content-Type"),
            header_value(req.headers, "Date"),
        );

        // BTreeMap iteration is already in canonical (sorted) order.
        for (name, value) in req.headers.iter() {
            if !value.is_empty() && name.starts_with(&self.header_prefix) {
                to_sign.push_str(name);
                to_sign.push(':');
                to_sign.push_str(value);
                to_sign.push('\n');
            }
        }

        to_sign.push_str(req.url);
        to_sign
    }
}

/// Compute the SigV2 signature: Base64(HMAC-SHA1(secret, string_to_sign)).
fn compute_signature(secret_key: &str, string_to_sign: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can accept any key length");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Extract a header value, returning an empty string if missing.
fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> &'a str {
    headers.get(name).map_or("", String::as_str)
}
