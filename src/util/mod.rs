//! Utility functions for common operations.
//!
//! - **URL validation**: the reader service root, and SSRF checks for URLs
//!   the service hands back (subscription icons)
//!
//! # Examples
//!
//! ```
//! use ldrmirror::util::{validate_base_url, validate_url};
//!
//! let base = validate_base_url("http://localhost:3000").unwrap();
//! assert_eq!(base.as_str(), "http://localhost:3000/");
//!
//! assert!(validate_url("http://10.0.0.1/icon.png").is_err());
//! ```

mod url_validator;

pub use url_validator::{is_same_origin, validate_base_url, validate_url, UrlValidationError};
