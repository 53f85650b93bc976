//! Request signing for stratus.
//!
//! Provides the SigV2 signer and the [`AwsService`] profile, the default
//! [`stratus_core::ServiceProfile`] implementation for stock S3.

pub mod aws;
pub mod sigv2;

pub use aws::AwsService;
pub use sigv2::Sigv2Signer;
