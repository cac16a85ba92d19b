//! Run one phase against the candidate list until something decides it.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::exit_code::classify_exit_code;
use crate::core::types::{Payload, Phase, PhaseResult};
use crate::exit_codes;
use crate::io::executor::PhaseExecutor;
use crate::io::verifier::PayloadVerifier;

/// How a phase ended across all candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Succeeded { payload: PathBuf },
    /// A candidate asked to stop everything; `code` is already reduced.
    Fatal { code: i32, payload: PathBuf },
    /// Every candidate was skipped or failed.
    Exhausted {
        /// Candidates actually spawned.
        spawned: usize,
        /// Captured output of the last spawned candidate.
        last_output: Option<String>,
    },
}

impl FallbackOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            FallbackOutcome::Succeeded { .. } => exit_codes::OK,
            FallbackOutcome::Fatal { code, .. } => *code,
            FallbackOutcome::Exhausted { .. } => exit_codes::FAILURE,
        }
    }
}

/// Try `phase` with each candidate in order.
///
/// Missing files are skipped without spawning. With a `verifier`, candidates it
/// does not vouch for are skipped too. The first success or fatal result ends
/// the phase; spawn errors are returned as errors.
#[instrument(skip_all, fields(phase = %phase))]
pub fn run_phase_with_fallback<E: PhaseExecutor>(
    executor: &E,
    phase: Phase,
    candidates: &[Payload],
    verifier: Option<&dyn PayloadVerifier>,
) -> Result<FallbackOutcome> {
    let mut spawned = 0usize;
    let mut last_output = None;

    for candidate in candidates {
        if !candidate.exists() {
            debug!(payload = %candidate.path.display(), "payload file missing, trying next");
            continue;
        }
        if verifier.is_some_and(|verifier| !verifier.verify(&candidate.path).gpg) {
            warn!(payload = %candidate.path.display(), "payload failed verification, trying next");
            continue;
        }

        let attempt = executor.execute(phase, &candidate.path)?;
        spawned += 1;

        match classify_exit_code(attempt.exit_code) {
            PhaseResult::Success => {
                info!(payload = %candidate.path.display(), "phase succeeded");
                return Ok(FallbackOutcome::Succeeded {
                    payload: candidate.path.clone(),
                });
            }
            PhaseResult::Fatal(code) => {
                warn!(
                    payload = %candidate.path.display(),
                    exit_code = ?attempt.exit_code,
                    code,
                    "phase failed fatally, not trying other payloads"
                );
                return Ok(FallbackOutcome::Fatal {
                    code,
                    payload: candidate.path.clone(),
                });
            }
            PhaseResult::RetryNext => {
                debug!(
                    payload = %candidate.path.display(),
                    exit_code = ?attempt.exit_code,
                    "phase failed, trying next payload"
                );
                last_output = Some(attempt.output_text());
            }
        }
    }

    Ok(FallbackOutcome::Exhausted { spawned, last_output })
}
