//! Shared deterministic types for the bootstrap core.
//!
//! These types define stable contracts between the orchestration layers. They
//! should not depend on external state or I/O.

use std::fmt;
use std::path::{Path, PathBuf};

/// One named stage of the payload pipeline.
///
/// The set is closed: every phase maps to a concrete handler at compile time and
/// only its [`Phase::name`] crosses the subprocess boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreUpdate,
    Update,
    PostUpdate,
    Collect,
    Upload,
    Checkin,
}

impl Phase {
    /// Full pipeline in execution order.
    pub const PIPELINE: [Phase; 5] = [
        Phase::PreUpdate,
        Phase::Update,
        Phase::PostUpdate,
        Phase::Collect,
        Phase::Upload,
    ];

    /// Wire name passed to the payload in the phase environment variable.
    pub fn name(self) -> &'static str {
        match self {
            Phase::PreUpdate => "pre_update",
            Phase::Update => "update",
            Phase::PostUpdate => "post_update",
            Phase::Collect => "collect",
            Phase::Upload => "upload",
            Phase::Checkin => "checkin",
        }
    }

    /// Phases that keep full privileges. Everything else is demoted when possible.
    pub fn run_as_root(self) -> bool {
        matches!(
            self,
            Phase::PreUpdate | Phase::Update | Phase::PostUpdate | Phase::Collect
        )
    }

    /// Position in the pipeline. `checkin` is a standalone entrypoint and sorts last.
    pub fn ordinal(self) -> u8 {
        match self {
            Phase::PreUpdate => 0,
            Phase::Update => 1,
            Phase::PostUpdate => 2,
            Phase::Collect => 3,
            Phase::Upload => 4,
            Phase::Checkin => 5,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a candidate payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Path given through the override environment variable.
    EnvironmentOverride,
    /// Most recently downloaded payload.
    Newest,
    /// Last payload that completed a full run.
    Stable,
    /// Payload shipped with the package.
    Vendor,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Origin::EnvironmentOverride => "environment-override",
            Origin::Newest => "newest",
            Origin::Stable => "stable",
            Origin::Vendor => "vendor-shipped",
        };
        f.write_str(label)
    }
}

/// A candidate payload on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub path: PathBuf,
    pub origin: Origin,
}

impl Payload {
    pub fn new(path: impl Into<PathBuf>, origin: Origin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Detached signature sibling of a payload: `<path>.asc`.
pub fn signature_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".asc");
    PathBuf::from(raw)
}

/// Classification of one `(phase, candidate)` execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseResult {
    /// Phase completed; stop trying candidates.
    Success,
    /// This candidate is broken for this phase; try the next one.
    RetryNext,
    /// Final, user-visible result. Carries the exit status to propagate.
    Fatal(i32),
}

/// Output of one phase subprocess. Discarded after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionAttempt {
    pub phase: Phase,
    pub payload: PathBuf,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionAttempt {
    /// Combined stdout and stderr, lossily decoded, used as the failure reason.
    pub fn output_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_is_in_ordinal_order() {
        let ordinals: Vec<u8> = Phase::PIPELINE.iter().map(|p| p.ordinal()).collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
        assert!(!Phase::PIPELINE.contains(&Phase::Checkin));
    }

    #[test]
    fn phase_names_match_wire_format() {
        let names: Vec<&str> = Phase::PIPELINE.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec!["pre_update", "update", "post_update", "collect", "upload"]
        );
        assert_eq!(Phase::Checkin.to_string(), "checkin");
    }

    #[test]
    fn network_phases_are_not_root() {
        assert!(Phase::Collect.run_as_root());
        assert!(!Phase::Upload.run_as_root());
        assert!(!Phase::Checkin.run_as_root());
    }

    #[test]
    fn signature_path_appends_asc() {
        assert_eq!(
            signature_path(Path::new("/var/lib/insights/newest.egg")),
            PathBuf::from("/var/lib/insights/newest.egg.asc")
        );
    }

    #[test]
    fn output_text_joins_streams() {
        let attempt = ExecutionAttempt {
            phase: Phase::Upload,
            payload: PathBuf::from("/tmp/p.egg"),
            exit_code: Some(1),
            stdout: b"Uploading Insights data.".to_vec(),
            stderr: b"Connection refused".to_vec(),
        };
        assert_eq!(
            attempt.output_text(),
            "Uploading Insights data.\nConnection refused"
        );
    }
}
