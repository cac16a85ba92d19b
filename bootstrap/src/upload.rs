//! Bounded retry around the upload phase.
//!
//! Each attempt is a full fallback run over the same candidates. Candidates are
//! verified once, before the first attempt. What happens after a failed attempt
//! depends on the failure reason the payload printed.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::failure::{FailureKind, classify_upload_failure};
use crate::core::types::{Payload, Phase};
use crate::exit_codes;
use crate::fallback::{FallbackOutcome, run_phase_with_fallback};
use crate::io::config::UploadConfig;
use crate::io::executor::PhaseExecutor;
use crate::io::verifier::PayloadVerifier;

/// Blocking wait between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Always at least 1.
    pub max_attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            wait,
        }
    }

    /// `attempts_override` comes from the command line and wins over the file.
    pub fn from_config(config: &UploadConfig, attempts_override: Option<u32>) -> Self {
        Self::new(
            attempts_override.unwrap_or(config.max_attempts),
            Duration::from_secs(config.wait_secs),
        )
    }
}

/// Operator-facing progress of the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    AttemptFailed { attempt: u32, max_attempts: u32 },
    Waiting { secs: u64 },
    AllAttemptsFailed,
    Rejected,
}

impl fmt::Display for UploadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadEvent::AttemptFailed { attempt, max_attempts } => {
                write!(f, "Upload attempt {attempt} of {max_attempts} failed")
            }
            UploadEvent::Waiting { secs } => write!(f, "Waiting {secs} seconds then retrying"),
            UploadEvent::AllAttemptsFailed => write!(f, "All attempts to upload have failed!"),
            UploadEvent::Rejected => write!(f, "Upload failed."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { attempts: u32, payload: PathBuf },
    /// A payload exited with a fatal code; `code` is already reduced.
    Fatal { code: i32 },
    /// The failure reason says retrying cannot help.
    Rejected { attempts: u32 },
    AllAttemptsFailed { attempts: u32 },
}

impl UploadOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            UploadOutcome::Uploaded { .. } => exit_codes::OK,
            UploadOutcome::Fatal { code } => *code,
            UploadOutcome::Rejected { .. } | UploadOutcome::AllAttemptsFailed { .. } => {
                exit_codes::FAILURE
            }
        }
    }
}

/// Candidates `verifier` vouches for, in order. Missing files are kept and left
/// for the fallback run to skip.
fn verified_candidates(
    candidates: &[Payload],
    verifier: Option<&dyn PayloadVerifier>,
) -> Vec<Payload> {
    let Some(verifier) = verifier else {
        return candidates.to_vec();
    };
    candidates
        .iter()
        .filter(|candidate| {
            let keep = !candidate.exists() || verifier.verify(&candidate.path).gpg;
            if !keep {
                warn!(payload = %candidate.path.display(), "payload failed verification, skipping");
            }
            keep
        })
        .cloned()
        .collect()
}

/// Run the upload phase until it succeeds, fails for good, or the policy runs out.
#[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub fn run_upload_with_retry<E, S, F>(
    executor: &E,
    candidates: &[Payload],
    verifier: Option<&dyn PayloadVerifier>,
    policy: RetryPolicy,
    sleeper: &S,
    mut on_event: F,
) -> Result<UploadOutcome>
where
    E: PhaseExecutor,
    S: Sleeper,
    F: FnMut(&UploadEvent),
{
    let candidates = verified_candidates(candidates, verifier);
    let mut attempt = 1u32;
    loop {
        let outcome = run_phase_with_fallback(executor, Phase::Upload, &candidates, None)?;
        let last_output = match outcome {
            FallbackOutcome::Succeeded { payload } => {
                info!(attempt, "upload succeeded");
                return Ok(UploadOutcome::Uploaded {
                    attempts: attempt,
                    payload,
                });
            }
            FallbackOutcome::Fatal { code, .. } => return Ok(UploadOutcome::Fatal { code }),
            FallbackOutcome::Exhausted { last_output, .. } => last_output.unwrap_or_default(),
        };

        if classify_upload_failure(&last_output) == FailureKind::Fatal {
            warn!(attempt, "upload rejected, not retrying");
            on_event(&UploadEvent::Rejected);
            return Ok(UploadOutcome::Rejected { attempts: attempt });
        }

        on_event(&UploadEvent::AttemptFailed {
            attempt,
            max_attempts: policy.max_attempts,
        });
        if attempt >= policy.max_attempts {
            on_event(&UploadEvent::AllAttemptsFailed);
            return Ok(UploadOutcome::AllAttemptsFailed { attempts: attempt });
        }

        on_event(&UploadEvent::Waiting {
            secs: policy.wait.as_secs(),
        });
        sleeper.sleep(policy.wait);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;

    use super::*;
    use crate::core::types::Origin;
    use crate::io::verifier::Verification;
    use crate::test_support::{
        RecordingSleeper, ScriptedExit, ScriptedPhaseExecutor, SetSignatureCheck, touch,
    };

    struct Setup {
        _dir: tempfile::TempDir,
        candidates: Vec<Payload>,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("last_stable.egg");
        touch(&path).expect("touch");
        Setup {
            candidates: vec![Payload::new(path, Origin::Stable)],
            _dir: dir,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(180))
    }

    /// Accepts every payload and counts how often it was asked.
    #[derive(Default)]
    struct CountingVerifier {
        calls: Cell<usize>,
    }

    impl PayloadVerifier for CountingVerifier {
        fn verify(&self, _payload: &Path) -> Verification {
            self.calls.set(self.calls.get() + 1);
            Verification { gpg: true }
        }
    }

    fn run(
        exec: &ScriptedPhaseExecutor,
        s: &Setup,
        sleeper: &RecordingSleeper,
    ) -> (UploadOutcome, Vec<String>) {
        let mut messages = Vec::new();
        let outcome = run_upload_with_retry(exec, &s.candidates, None, policy(), sleeper, |event| {
            messages.push(event.to_string());
        })
        .expect("upload");
        (outcome, messages)
    }

    #[test]
    fn retryable_failures_use_every_attempt() {
        let s = setup();
        let exec = ScriptedPhaseExecutor::new()
            .always(&s.candidates[0].path, ScriptedExit::code(1).with_output("Connection refused"));
        let sleeper = RecordingSleeper::new();

        let (outcome, messages) = run(&exec, &s, &sleeper);
        assert_eq!(outcome, UploadOutcome::AllAttemptsFailed { attempts: 3 });
        assert_eq!(outcome.exit_code(), exit_codes::FAILURE);
        assert_eq!(exec.calls().len(), 3);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(180); 2]);
        assert_eq!(
            messages,
            vec![
                "Upload attempt 1 of 3 failed",
                "Waiting 180 seconds then retrying",
                "Upload attempt 2 of 3 failed",
                "Waiting 180 seconds then retrying",
                "Upload attempt 3 of 3 failed",
                "All attempts to upload have failed!",
            ]
        );
    }

    #[test]
    fn candidates_are_verified_once_across_attempts() {
        let s = setup();
        let exec = ScriptedPhaseExecutor::new()
            .always(&s.candidates[0].path, ScriptedExit::code(1).with_output("Connection refused"));
        let sleeper = RecordingSleeper::new();
        let verifier = CountingVerifier::default();

        let outcome =
            run_upload_with_retry(&exec, &s.candidates, Some(&verifier), policy(), &sleeper, |_| {})
                .expect("upload");
        assert_eq!(outcome, UploadOutcome::AllAttemptsFailed { attempts: 3 });
        assert_eq!(exec.calls().len(), 3);
        assert_eq!(verifier.calls.get(), 1);
    }

    #[test]
    fn unverified_candidate_is_never_uploaded_with() {
        let dir = tempfile::tempdir().expect("tempdir");
        let newest = dir.path().join("newest.egg");
        let stable = dir.path().join("last_stable.egg");
        touch(&newest).expect("touch");
        touch(&stable).expect("touch");
        let candidates = vec![
            Payload::new(newest.clone(), Origin::Newest),
            Payload::new(stable.clone(), Origin::Stable),
        ];
        let exec = ScriptedPhaseExecutor::new().queue(
            Phase::Upload,
            &stable,
            [ScriptedExit::code(1).with_output("Connection refused"), ScriptedExit::code(0)],
        );
        let verifier = SetSignatureCheck::new([&stable]);
        let sleeper = RecordingSleeper::new();

        let outcome =
            run_upload_with_retry(&exec, &candidates, Some(&verifier), policy(), &sleeper, |_| {})
                .expect("upload");
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                attempts: 2,
                payload: stable.clone()
            }
        );
        assert_eq!(exec.calls_for(Phase::Upload), vec![stable.clone(), stable]);
    }

    #[test]
    fn fatal_reason_stops_after_one_attempt() {
        let s = setup();
        let exec = ScriptedPhaseExecutor::new().always(
            &s.candidates[0].path,
            ScriptedExit::code(1).with_output("Archive is too large to upload"),
        );
        let sleeper = RecordingSleeper::new();

        let (outcome, messages) = run(&exec, &s, &sleeper);
        assert_eq!(outcome, UploadOutcome::Rejected { attempts: 1 });
        assert_eq!(exec.calls().len(), 1);
        assert!(sleeper.waits().is_empty());
        assert_eq!(messages, vec!["Upload failed."]);
    }

    #[test]
    fn success_on_second_attempt() {
        let s = setup();
        let exec = ScriptedPhaseExecutor::new().queue(
            Phase::Upload,
            &s.candidates[0].path,
            [ScriptedExit::code(1).with_output("Read timed out"), ScriptedExit::code(0)],
        );
        let sleeper = RecordingSleeper::new();

        let (outcome, _) = run(&exec, &s, &sleeper);
        assert_eq!(
            outcome,
            UploadOutcome::Uploaded {
                attempts: 2,
                payload: s.candidates[0].path.clone()
            }
        );
        assert_eq!(sleeper.waits().len(), 1);
    }

    #[test]
    fn fatal_exit_code_aborts_immediately() {
        let s = setup();
        let exec =
            ScriptedPhaseExecutor::new().always(&s.candidates[0].path, ScriptedExit::code(103));
        let sleeper = RecordingSleeper::new();

        let (outcome, messages) = run(&exec, &s, &sleeper);
        assert_eq!(outcome, UploadOutcome::Fatal { code: 3 });
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(exec.calls().len(), 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn unclassified_reason_is_retried() {
        let s = setup();
        let exec = ScriptedPhaseExecutor::new()
            .always(&s.candidates[0].path, ScriptedExit::code(1).with_output("something odd"));
        let sleeper = RecordingSleeper::new();

        let (outcome, _) = run(&exec, &s, &sleeper);
        assert_eq!(outcome, UploadOutcome::AllAttemptsFailed { attempts: 3 });
    }

    #[test]
    fn override_wins_and_zero_becomes_one() {
        let config = UploadConfig {
            max_attempts: 3,
            wait_secs: 5,
        };
        assert_eq!(RetryPolicy::from_config(&config, Some(7)).max_attempts, 7);
        assert_eq!(RetryPolicy::from_config(&config, None).max_attempts, 3);
        assert_eq!(RetryPolicy::from_config(&config, Some(0)).max_attempts, 1);
        assert_eq!(RetryPolicy::from_config(&config, None).wait, Duration::from_secs(5));
    }
}
