//! I/O helpers for the bootstrap: processes, signatures, files.

pub mod config;
pub mod executor;
pub mod motd;
pub mod privilege;
pub mod process;
pub mod ranker;
pub mod signature;
pub mod verifier;
