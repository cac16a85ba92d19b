//! The phase pipeline driver.
//!
//! An [`Orchestrator`] is built once at startup from the selected candidates
//! and runs phases strictly in order. The first phase that does not succeed
//! decides the exit code.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Payload, Phase};
use crate::exit_codes;
use crate::fallback::{FallbackOutcome, run_phase_with_fallback};
use crate::io::executor::PhaseExecutor;
use crate::io::motd::{MotdPaths, update_motd};
use crate::io::verifier::PayloadVerifier;
use crate::upload::{RetryPolicy, Sleeper, UploadEvent, UploadOutcome, run_upload_with_retry};

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entrypoint {
    /// `pre_update` through `upload`.
    Pipeline,
    /// `checkin` only.
    Checkin,
}

impl Entrypoint {
    pub fn phases(self) -> &'static [Phase] {
        match self {
            Entrypoint::Pipeline => &Phase::PIPELINE,
            Entrypoint::Checkin => &[Phase::Checkin],
        }
    }
}

/// How one phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseVerdict {
    Succeeded,
    /// A payload ended the whole run. The code may be `0`.
    Fatal(i32),
    /// No payload could complete the phase.
    Failed(i32),
}

impl From<FallbackOutcome> for PhaseVerdict {
    fn from(outcome: FallbackOutcome) -> Self {
        match outcome {
            FallbackOutcome::Succeeded { .. } => PhaseVerdict::Succeeded,
            FallbackOutcome::Fatal { code, .. } => PhaseVerdict::Fatal(code),
            FallbackOutcome::Exhausted { .. } => PhaseVerdict::Failed(outcome.exit_code()),
        }
    }
}

impl From<UploadOutcome> for PhaseVerdict {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Uploaded { .. } => PhaseVerdict::Succeeded,
            UploadOutcome::Fatal { code } => PhaseVerdict::Fatal(code),
            UploadOutcome::Rejected { .. } | UploadOutcome::AllAttemptsFailed { .. } => {
                PhaseVerdict::Failed(outcome.exit_code())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub completed: Vec<Phase>,
    /// The phase that ended the run early, if any.
    pub stopped_at: Option<Phase>,
}

pub struct Orchestrator<E, S> {
    candidates: Vec<Payload>,
    executor: E,
    sleeper: S,
    retry: RetryPolicy,
    verifier: Option<Box<dyn PayloadVerifier>>,
    motd: Option<MotdPaths>,
}

impl<E: PhaseExecutor, S: Sleeper> Orchestrator<E, S> {
    pub fn new(candidates: Vec<Payload>, executor: E, sleeper: S, retry: RetryPolicy) -> Self {
        Self {
            candidates,
            executor,
            sleeper,
            retry,
            verifier: None,
            motd: None,
        }
    }

    /// Re-check every candidate with `verifier` before each phase.
    pub fn with_verifier(mut self, verifier: Box<dyn PayloadVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Refresh the MOTD after every successful phase.
    pub fn with_motd(mut self, paths: MotdPaths) -> Self {
        self.motd = Some(paths);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    fn run_phase<F>(&self, phase: Phase, on_event: F) -> Result<PhaseVerdict>
    where
        F: FnMut(&UploadEvent),
    {
        let verifier = self.verifier.as_deref();
        let verdict = match phase {
            Phase::Upload => run_upload_with_retry(
                &self.executor,
                &self.candidates,
                verifier,
                self.retry,
                &self.sleeper,
                on_event,
            )?
            .into(),
            Phase::PreUpdate
            | Phase::Update
            | Phase::PostUpdate
            | Phase::Collect
            | Phase::Checkin => {
                run_phase_with_fallback(&self.executor, phase, &self.candidates, verifier)?.into()
            }
        };
        Ok(verdict)
    }

    /// Run every phase of `entrypoint`; `on_event` receives upload progress.
    #[instrument(skip_all, fields(entrypoint = ?entrypoint))]
    pub fn run<F: FnMut(&UploadEvent)>(
        &self,
        entrypoint: Entrypoint,
        mut on_event: F,
    ) -> Result<RunOutcome> {
        let mut completed = Vec::new();
        for &phase in entrypoint.phases() {
            info!(%phase, ordinal = phase.ordinal(), "starting phase");
            let exit_code = match self.run_phase(phase, &mut on_event)? {
                PhaseVerdict::Succeeded => {
                    if let Some(motd) = &self.motd {
                        let action = update_motd(motd);
                        debug!(%phase, ?action, "refreshed MOTD");
                    }
                    completed.push(phase);
                    continue;
                }
                PhaseVerdict::Fatal(code) => {
                    info!(%phase, exit_code = code, "payload ended the run");
                    code
                }
                PhaseVerdict::Failed(code) => {
                    warn!(%phase, exit_code = code, "phase did not succeed, stopping");
                    code
                }
            };
            return Ok(RunOutcome {
                exit_code,
                completed,
                stopped_at: Some(phase),
            });
        }
        Ok(RunOutcome {
            exit_code: exit_codes::OK,
            completed,
            stopped_at: None,
        })
    }
}
