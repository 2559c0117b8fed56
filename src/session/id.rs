//! Session identifier generation and validation.
//!
//! Identifiers double as directory names under the sessions root, so anything
//! that is not a plain `[A-Za-z0-9_-]` token is rejected before it gets near
//! the filesystem.

use uuid::Uuid;

use crate::error::Su2Error;

const MAX_ID_LEN: usize = 128;
const MAX_LABEL_LEN: usize = 64;

/// Allocate a fresh identifier.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accept only identifiers that are safe as a single path component.
pub fn validate_session_id(id: &str) -> Result<&str, Su2Error> {
    let ok = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(id)
    } else {
        Err(Su2Error::InvalidSessionId(id.to_string()))
    }
}

/// Reduce a free-form label to `[A-Za-z0-9_-]`, at most 64 characters.
pub fn sanitize_label(label: &str) -> Option<String> {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}
