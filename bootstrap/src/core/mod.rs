//! Deterministic, pure logic shared by the bootstrap.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod exit_code;
pub mod failure;
pub mod types;
pub mod version;
