//! Utility functions shared across the crate.
//!
//! - **URL validation**: scheme and syntax checks before a request goes out

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
