//! Identifier validation
//!
//! Bundle ids, namespaces and topic components share one rule: alphanumeric
//! runs separated by single `.`, `_` or `-` characters, at most
//! [`MAX_LENGTH`] characters. Anything accepted here is safe to use as a
//! single path component.

use crate::error::{BundleError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Maximum identifier length
pub const MAX_LENGTH: usize = 76;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]+(?:[._-](?:[A-Za-z0-9]+))*$")
            .expect("identifier pattern is valid")
    })
}

/// Validate an identifier
pub fn validate(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(invalid(id, "identifier must not be empty"));
    }

    if id.len() > MAX_LENGTH {
        return Err(invalid(
            id,
            &format!("identifier is longer than {} characters", MAX_LENGTH),
        ));
    }

    if !pattern().is_match(id) {
        return Err(invalid(
            id,
            "identifier must match [A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*",
        ));
    }

    Ok(())
}

fn invalid(id: &str, reason: &str) -> BundleError {
    BundleError::InvalidIdentifier {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}
