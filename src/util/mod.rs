//! Utility functions for common operations.
//!
//! - **URL validation**: scheme checks and an optional SSRF guard for feed URLs
//! - **Text processing**: whitespace canonicalisation used by parsing and
//!   fingerprinting

mod text;
mod url_validator;

pub use text::{collapse_whitespace, strip_control_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};
