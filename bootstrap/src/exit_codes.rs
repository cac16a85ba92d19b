//! Stable exit codes for `insights-client`.
//!
//! A fatal payload exit `c >= 100` is passed through as `c % 100`, so any value
//! in `0..100` can also appear.

/// Every phase succeeded, or `--version` was printed.
pub const OK: i32 = 0;
/// A phase ran out of payloads, the upload gave up, or startup failed.
pub const FAILURE: i32 = 1;
