//! Boundary input validation.
//!
//! Malformed inputs are rejected here, before any remote call is made or
//! any retry budget is spent. Deliberately thin: the remote service remains
//! the authority on deeper validation, and its 400 responses are surfaced
//! through the dispatcher's classification.

use crate::error::{DragnetError, Result};

/// Reject empty or non-http(s) URLs.
pub fn url(raw: &str) -> Result<()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DragnetError::Validation {
            message: "url must not be empty".to_string(),
        });
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(DragnetError::Validation {
            message: format!("url must start with http:// or https://, got '{}'", trimmed),
        });
    }
    Ok(())
}

/// Reject empty search queries.
pub fn query(raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(DragnetError::Validation {
            message: "query must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Reject zone names outside `[a-z0-9_]`.
pub fn zone_name(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(DragnetError::Validation {
            message: "zone name must not be empty".to_string(),
        });
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(DragnetError::Validation {
            message: format!("zone name '{}' may only contain [a-z0-9_]", raw),
        });
    }
    Ok(())
}
