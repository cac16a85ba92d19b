//! Executor abstraction for running one phase against one payload.
//!
//! The [`PhaseExecutor`] trait decouples fallback orchestration from process
//! spawning. Tests use scripted executors that return predetermined exit codes
//! without spawning anything.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{ExecutionAttempt, Phase};
use crate::io::config::PayloadConfig;
use crate::io::privilege::PrivilegeDemoter;
use crate::io::process::{command_from, run_command_forwarding};

/// Runs `phase` with `payload` and reports what happened.
pub trait PhaseExecutor {
    fn execute(&self, phase: Phase, payload: &Path) -> Result<ExecutionAttempt>;
}

/// Spawns the payload command in a child process.
///
/// The child inherits our environment plus the phase variable and a module path
/// with the payload in front. Its output is forwarded live and captured.
#[derive(Debug, Clone)]
pub struct SubprocessPhaseExecutor {
    command: Vec<String>,
    extra_args: Vec<String>,
    phase_env: String,
    module_path_env: String,
    inherited_module_path: Option<OsString>,
    output_limit_bytes: usize,
    demoter: PrivilegeDemoter,
}

impl SubprocessPhaseExecutor {
    /// `extra_args` are appended to the payload command verbatim.
    pub fn new(config: &PayloadConfig, demoter: PrivilegeDemoter, extra_args: Vec<String>) -> Self {
        Self {
            command: config.command.clone(),
            extra_args,
            phase_env: config.phase_env.clone(),
            module_path_env: config.module_path_env.clone(),
            inherited_module_path: std::env::var_os(&config.module_path_env),
            output_limit_bytes: config.output_limit_bytes,
            demoter,
        }
    }

    /// Payload first, then whatever module path we were started with.
    fn module_path(&self, payload: &Path) -> OsString {
        let mut value = payload.as_os_str().to_owned();
        if let Some(inherited) = self.inherited_module_path.as_ref().filter(|v| !v.is_empty()) {
            value.push(":");
            value.push(inherited);
        }
        value
    }
}

impl PhaseExecutor for SubprocessPhaseExecutor {
    #[instrument(skip(self), fields(phase = %phase, payload = %payload.display()))]
    fn execute(&self, phase: Phase, payload: &Path) -> Result<ExecutionAttempt> {
        let mut cmd = command_from(&self.command);
        cmd.args(&self.extra_args)
            .env(&self.phase_env, phase.name())
            .env(&self.module_path_env, self.module_path(payload));

        if let Some(demotion) = self.demoter.demotion_for(phase) {
            debug!(uid = demotion.uid, gid = demotion.gid, "demoting phase");
            demotion.apply(&mut cmd);
        }

        info!("running phase");
        let output = run_command_forwarding(cmd, self.output_limit_bytes)
            .with_context(|| format!("run phase '{phase}' with {}", payload.display()))?;

        Ok(ExecutionAttempt {
            phase,
            payload: payload.to_path_buf(),
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
