//! Validation for operator-supplied paths
//!
//! Route prefixes and the relay path come from flags, environment, or the
//! routes file. They are checked once at startup so request handling can
//! rely on their shape.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// One or more `/segment` parts made of RFC 3986 path characters
static MOUNT_PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[A-Za-z0-9._~!$&'()*+,;=:@%-]+)+$").unwrap());

/// Maximum length for configured paths
pub const MAX_PATH_LENGTH: usize = 256;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Path must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("Path must not be the root path")]
    RootPath,

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),

    #[error("Invalid path format: {0}")]
    InvalidPath(String),

    #[error("Path contains dot segments: {0}")]
    DotSegment(String),
}

/// Validate and normalize a route prefix
///
/// Trailing slashes are removed, so `/api/` and `/api` are the same prefix.
///
/// # Examples
///
/// ```
/// use venue_gateway_common::validation::validate_prefix;
///
/// assert_eq!(validate_prefix("/api/").unwrap(), "/api");
/// assert!(validate_prefix("api").is_err());
/// assert!(validate_prefix("/").is_err());
/// ```
pub fn validate_prefix(prefix: &str) -> Result<String, ValidationError> {
    validate_mount_path(prefix)
}

/// Validate and normalize the WebSocket relay path
pub fn validate_relay_path(path: &str) -> Result<String, ValidationError> {
    validate_mount_path(path)
}

fn validate_mount_path(path: &str) -> Result<String, ValidationError> {
    let path = path.trim();

    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }
    if !path.starts_with('/') {
        return Err(ValidationError::MissingLeadingSlash(
            path.chars().take(50).collect(),
        ));
    }

    let normalized = path.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(ValidationError::RootPath);
    }
    if !MOUNT_PATH_REGEX.is_match(normalized) {
        return Err(ValidationError::InvalidPath(
            normalized.chars().take(50).collect(),
        ));
    }
    if normalized
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(ValidationError::DotSegment(normalized.to_string()));
    }

    Ok(normalized.to_string())
}
