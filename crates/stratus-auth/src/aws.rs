//! Service profile for Amazon Web Services.

use stratus_core::{Config, ServiceProfile, SignableRequest};

use crate::sigv2::Sigv2Signer;

const HEADER_PREFIX: &str = "x-amz-";
const META_HEADER_PREFIX: &str = "x-amz-meta-";

/// The stock AWS dialect: `x-amz-` headers, path-style bucket URLs, SigV2
/// authorization, multipart transfers supported. AWS v1 listings only emit
/// `NextMarker` when a delimiter is present, so continuation falls back to
/// the last returned key.
pub struct AwsService {
    url_prefix: String,
    bucket_url: String,
    signer: Sigv2Signer,
}

impl AwsService {
    /// Build the AWS profile from a loaded configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            url_prefix: config.endpoint.clone(),
            bucket_url: format!("/{}", stratus_core::encode::url_encode(&config.bucket)),
            signer: Sigv2Signer::new(
                config.aws_key.clone(),
                config.aws_secret.clone(),
                HEADER_PREFIX.to_owned(),
            ),
        }
    }
}

impl ServiceProfile for AwsService {
    fn header_prefix(&self) -> &str {
        HEADER_PREFIX
    }

    fn meta_header_prefix(&self) -> &str {
        META_HEADER_PREFIX
    }

    fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    fn bucket_url(&self) -> &str {
        &self.bucket_url
    }

    fn is_multipart_upload_supported(&self) -> bool {
        true
    }

    fn is_multipart_download_supported(&self) -> bool {
        true
    }

    fn is_next_marker_supported(&self) -> bool {
        false
    }

    fn sign(&self, req: &mut SignableRequest<'_>, _last_sign_failed: bool) {
        self.signer.sign(req);
    }
}
