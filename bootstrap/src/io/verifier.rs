//! The loaded payload's own `verify(path)` contract.
//!
//! Before each phase, with signing enabled, every candidate is re-checked by
//! the payload that was selected at startup. This is separate from the
//! bootstrap-time keyring validation in [`crate::io::signature`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::PayloadConfig;
use crate::io::process::{command_from, run_command_with_timeout};
use crate::io::signature::{SignatureCheck, SignatureValidator};

const VERIFY_OUTPUT_LIMIT_BYTES: usize = 16 * 1024;

/// Result of `verify(path)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub gpg: bool,
}

pub trait PayloadVerifier {
    fn verify(&self, payload: &Path) -> Verification;
}

impl PayloadVerifier for SignatureValidator {
    fn verify(&self, payload: &Path) -> Verification {
        Verification {
            gpg: self.validate(payload),
        }
    }
}

/// Calls `verify_command <path>` with the module path set to the host payload and
/// parses the JSON object it prints.
#[derive(Debug, Clone)]
pub struct SubprocessVerifier {
    host: PathBuf,
    verify_command: Vec<String>,
    module_path_env: String,
    timeout: Duration,
}

impl SubprocessVerifier {
    pub fn new(config: &PayloadConfig, host: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            verify_command: config.verify_command.clone(),
            module_path_env: config.module_path_env.clone(),
            timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }

    fn run(&self, payload: &Path) -> Result<Verification> {
        let mut cmd = command_from(&self.verify_command);
        cmd.arg(payload).env(&self.module_path_env, &self.host);
        let output = run_command_with_timeout(cmd, self.timeout, VERIFY_OUTPUT_LIMIT_BYTES)
            .context("run payload verify")?;
        if !output.succeeded() {
            return Err(anyhow!(
                "payload verify exited with {:?} (timed out: {})",
                output.status.code(),
                output.timed_out
            ));
        }
        parse_verification(&output.stdout)
    }
}

impl PayloadVerifier for SubprocessVerifier {
    #[instrument(skip(self), fields(payload = %payload.display(), host = %self.host.display()))]
    fn verify(&self, payload: &Path) -> Verification {
        match self.run(payload) {
            Ok(verification) => {
                debug!(gpg = verification.gpg, "payload verify finished");
                verification
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "payload verify failed, treating as unverified");
                Verification { gpg: false }
            }
        }
    }
}

/// Parse the last non-empty stdout line as the verification object.
///
/// Earlier lines are the payload's own chatter and are ignored.
fn parse_verification(stdout: &[u8]) -> Result<Verification> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| anyhow!("payload verify printed nothing"))?;
    serde_json::from_str(line.trim()).with_context(|| format!("parse verify output {line:?}"))
}
