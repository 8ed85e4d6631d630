use base64::Engine;
use sha2::{Digest, Sha256};

use super::prompt::PROMPT_VERSION;
use crate::models::SuggestionKind;

/// Lowercase and collapse whitespace so trivially different spellings of
/// the same request share a cache entry.
pub fn normalize_request_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic cache key for one recommendation request.
///
/// SHA-256 over the prompt version, suggestion kind, patient id, the
/// normalized request text and the context fingerprint, base64 encoded.
pub fn cache_key(
    kind: SuggestionKind,
    patient_id: i64,
    normalized_text: &str,
    context_fingerprint: &str,
) -> String {
    let patient = patient_id.to_string();
    let mut hasher = Sha256::new();
    for part in [
        PROMPT_VERSION,
        kind.as_str(),
        patient.as_str(),
        normalized_text,
        context_fingerprint,
    ] {
        hasher.update(part.as_bytes());
        // unit separator keeps ("ab","c") distinct from ("a","bc")
        hasher.update([0x1f]);
    }
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
