//! Classification of upload failure reasons.
//!
//! The payload reports why an upload failed in its output. Transport problems
//! are worth another attempt; content problems will fail identically every time.

/// Whether a failed upload should be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    Fatal,
}

/// Output fragments that mark a rejected archive. Matched case-insensitively.
const FATAL_MARKERS: &[&str] = &[
    "invalid content-type",
    "content type different from compression",
    "archive is too large",
    "too large to upload",
    "malformed",
    "unsupported media type",
];

/// Output fragments that mark a connectivity problem. Matched case-insensitively.
const RETRYABLE_MARKERS: &[&str] = &[
    "connection refused",
    "refused",
    "timed out",
    "timeout",
    "temporary failure in name resolution",
    "name or service not known",
    "connection reset",
    "network is unreachable",
    "max retries exceeded",
];

/// Classify the captured output of a failed upload attempt.
///
/// Fatal markers win over retryable ones. Unrecognized reasons are retryable.
pub fn classify_upload_failure(reason: &str) -> FailureKind {
    let lowered = reason.to_ascii_lowercase();
    if FATAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return FailureKind::Fatal;
    }
    if !RETRYABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        tracing::debug!("unrecognized upload failure reason, treating as retryable");
    }
    FailureKind::Retryable
}
