//! Ordering of candidate payloads by their self-reported version.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::Payload;
use crate::core::version::{parse_version, sort_by_version_desc};
use crate::io::config::PayloadConfig;
use crate::io::process::{command_from, run_command_with_timeout};

const VERSION_OUTPUT_LIMIT_BYTES: usize = 4096;

/// Asks a payload which version it is. `None` when it cannot tell.
pub trait VersionLookup {
    fn version(&self, payload: &Path) -> Option<String>;
}

/// Asks a payload for its version by running `version_command` in an isolated environment.
///
/// The child sees only `PATH` and the module-search-path variable pointing at the
/// payload, so nothing from our own environment leaks into the answer.
#[derive(Debug, Clone)]
pub struct SubprocessVersionLookup {
    version_command: Vec<String>,
    module_path_env: String,
    timeout: Duration,
}

impl SubprocessVersionLookup {
    pub fn new(config: &PayloadConfig) -> Self {
        Self {
            version_command: config.version_command.clone(),
            module_path_env: config.module_path_env.clone(),
            timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

impl VersionLookup for SubprocessVersionLookup {
    #[instrument(skip(self), fields(payload = %payload.display()))]
    fn version(&self, payload: &Path) -> Option<String> {
        let mut cmd = command_from(&self.version_command);
        cmd.env_clear().env(&self.module_path_env, payload);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let output = match run_command_with_timeout(cmd, self.timeout, VERSION_OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "version lookup could not run");
                return None;
            }
        };
        if !output.succeeded() {
            debug!(
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                "version lookup failed"
            );
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return None;
        }
        debug!(%version, "read payload version");
        Some(version)
    }
}

/// Order candidates highest version first. Fewer than two candidates are returned as-is.
///
/// Failed lookups count as version `0`. Equal versions keep their input order.
pub fn rank_payloads<P: VersionLookup>(lookup: &P, candidates: Vec<Payload>) -> Vec<Payload> {
    if candidates.len() < 2 {
        return candidates;
    }
    let versioned = candidates
        .into_iter()
        .map(|payload| {
            let raw = lookup.version(&payload.path).unwrap_or_else(|| "0".to_string());
            let version = parse_version(&raw);
            (payload, version)
        })
        .collect();
    let ranked = sort_by_version_desc(versioned);
    debug!(
        order = ?ranked.iter().map(|p| p.path.clone()).collect::<Vec<PathBuf>>(),
        "ranked payloads"
    );
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Origin;
    use crate::test_support::MapVersionLookup;

    fn pair() -> (Payload, Payload) {
        (
            Payload::new("/payloads/a.egg", Origin::Stable),
            Payload::new("/payloads/b.egg", Origin::Vendor),
        )
    }

    #[test]
    fn higher_version_first_regardless_of_input_order() {
        let (a, b) = pair();
        let lookup = MapVersionLookup::new([(&a.path, "3.0.10"), (&b.path, "3.0.9")]);

        let forward = rank_payloads(&lookup, vec![a.clone(), b.clone()]);
        let reverse = rank_payloads(&lookup, vec![b.clone(), a.clone()]);
        assert_eq!(forward, vec![a.clone(), b.clone()]);
        assert_eq!(reverse, vec![a, b]);
    }

    #[test]
    fn failed_lookup_counts_as_zero() {
        let (a, b) = pair();
        let lookup = MapVersionLookup::new([(&b.path, "1.0.0")]);

        assert_eq!(rank_payloads(&lookup, vec![a.clone(), b.clone()]), vec![b, a]);
    }

    #[test]
    fn ties_preserve_order() {
        let (a, b) = pair();
        let lookup = MapVersionLookup::new([(&a.path, "2.0"), (&b.path, "2.0.0")]);

        assert_eq!(rank_payloads(&lookup, vec![b.clone(), a.clone()]), vec![b, a]);
    }

    #[test]
    fn single_candidate_is_not_queried() {
        let (a, _) = pair();
        let lookup = MapVersionLookup::new(Vec::<(&PathBuf, &str)>::new());

        assert_eq!(rank_payloads(&lookup, vec![a.clone()]), vec![a]);
        assert_eq!(lookup.calls(), 0);
    }

    #[test]
    fn subprocess_lookup_reads_stdout_with_module_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let payload = temp.path().join("stable.egg");
        std::fs::write(temp.path().join("stable.egg.version"), "3.2.1\n").expect("write");
        let config = PayloadConfig {
            version_command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "cat \"$PYTHONPATH.version\"".to_string(),
            ],
            ..PayloadConfig::default()
        };

        let lookup = SubprocessVersionLookup::new(&config);
        assert_eq!(lookup.version(&payload).as_deref(), Some("3.2.1"));
    }

    #[test]
    fn subprocess_lookup_failure_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PayloadConfig {
            version_command: vec!["/bin/sh".to_string(), "-c".to_string(), "exit 1".to_string()],
            ..PayloadConfig::default()
        };

        let lookup = SubprocessVersionLookup::new(&config);
        assert_eq!(lookup.version(&temp.path().join("x.egg")), None);
    }
}
