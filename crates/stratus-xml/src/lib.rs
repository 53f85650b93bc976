//! Listing-response XML parsing for stratus.

pub mod error;
pub mod list;

pub use error::XmlError;
pub use list::{parse_list_result, ListBucketResult};
