//! Bootstrap for the insights client payload.
//!
//! Picks a trusted payload among several installed versions, runs the fixed
//! phase pipeline against it in child processes, demotes phases that do not
//! need root, and falls back to older signed payloads when one fails.
//!
//! - **[`core`]**: Pure logic (phase table, exit-code and failure
//!   classification, version ordering). No I/O.
//! - **[`io`]**: Side effects (config, subprocesses, gpg, passwd, MOTD),
//!   behind traits where tests need to replace them.
//!
//! [`candidates`], [`fallback`], [`upload`] and [`pipeline`] combine the two
//! to implement a run of `insights-client`.

pub mod candidates;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod fallback;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod upload;
