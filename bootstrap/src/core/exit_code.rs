//! Conversion between the payload's integer exit status and [`PhaseResult`].
//!
//! The payload signals two things over one integer: `0`/`1` stay in the
//! "try another candidate" domain, anything `>= 100` is a final result whose
//! real status is `code % 100`.

use crate::core::types::PhaseResult;

/// First exit code of the fatal domain.
pub const FATAL_THRESHOLD: i32 = 100;

/// Classify a child exit status. `None` means the child died from a signal.
pub fn classify_exit_code(code: Option<i32>) -> PhaseResult {
    match code {
        Some(0) => PhaseResult::Success,
        Some(code) if code >= FATAL_THRESHOLD => PhaseResult::Fatal(code % FATAL_THRESHOLD),
        // 1 is the documented "try the next candidate"; unexpected codes and
        // signal deaths are treated the same way.
        Some(_) | None => PhaseResult::RetryNext,
    }
}
