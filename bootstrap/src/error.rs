//! Operator-facing startup errors.
//!
//! Everything here stops the process before any phase runs. Execution failures
//! are outcomes, not errors (see [`crate::fallback`] and [`crate::upload`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("No GPG-verified initial payloads can be found")]
    NoValidPayloads,

    #[error("Account '{name}' does not exist; create it or set privilege.require_account = false")]
    AccountMissing { name: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}
