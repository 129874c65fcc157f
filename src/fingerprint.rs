//! Content fingerprinting for deduplication.
//!
//! The fingerprint is a SHA-256 digest over a canonical tuple of identity
//! fields. Volatile metadata (retrieval timestamps, source bookkeeping) never
//! participates, so re-fetching an unchanged document always produces the
//! same fingerprint on any host.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::CandidateDocument;

/// Identity text fields are hashed over at most this many bytes of
/// normalized text, bounding hash input and ignoring trailing boilerplate.
pub const TEXT_PREFIX_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Every identity field was empty after normalization. The document
    /// cannot be deduplicated, which is fatal for that document.
    #[error("document has no identity fields to fingerprint")]
    EmptyIdentity,
}

/// Normalize an identity field: trim, lowercase, collapse inner whitespace.
fn normalize_field(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Compute the fingerprint for a candidate document.
///
/// Deterministic and pure: the same logical input yields the same output
/// regardless of process or host.
pub fn compute(doc: &CandidateDocument) -> Result<String, FingerprintError> {
    let court = normalize_field(&doc.court);
    let docket_number = normalize_field(&doc.docket_number);
    let case_name = normalize_field(&doc.case_name);
    let date_filed = doc
        .date_filed
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let author = normalize_field(doc.author.as_deref().unwrap_or(""));
    let text = normalize_field(&doc.raw_content);
    let text_prefix = truncate_to_boundary(&text, TEXT_PREFIX_BYTES);

    if court.is_empty()
        && docket_number.is_empty()
        && case_name.is_empty()
        && date_filed.is_empty()
        && author.is_empty()
        && text_prefix.is_empty()
    {
        return Err(FingerprintError::EmptyIdentity);
    }

    // Length-prefix each field so distinct tuples can never collide by
    // shifting bytes between adjacent fields.
    let mut hasher = Sha256::new();
    for field in [
        court.as_str(),
        docket_number.as_str(),
        case_name.as_str(),
        date_filed.as_str(),
        author.as_str(),
        text_prefix,
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }

    Ok(hex::encode(hasher.finalize()))
}
