//! Bootstrap configuration stored in `/etc/insights-client/bootstrap.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BootstrapError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/insights-client/bootstrap.toml";

/// Environment variable holding a payload path that outranks every other candidate.
pub const PAYLOAD_OVERRIDE_ENV: &str = "EGG";
/// Environment toggle (`true`, any case) that skips signature checks. Development only.
pub const BYPASS_SIGNATURE_ENV: &str = "BYPASS_GPG";
/// Environment toggle (`true`, any case) that enables debug diagnostics.
pub const DEBUG_ENV: &str = "INSIGHTS_DEBUG";

/// Bootstrap configuration (TOML).
///
/// Missing fields default to the packaged layout, so an absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Require valid detached signatures for the newest/stable/vendor payloads
    /// and re-verify each candidate before running a phase.
    pub gpg: bool,
    pub paths: PathsConfig,
    pub payload: PayloadConfig,
    pub signature: SignatureConfig,
    pub upload: UploadConfig,
    pub privilege: PrivilegeConfig,
}

/// Well-known filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub newest_payload: PathBuf,
    pub stable_payload: PathBuf,
    pub vendor_payload: PathBuf,
    pub motd_source: PathBuf,
    pub motd_file: PathBuf,
    pub registered_marker: PathBuf,
    pub unregistered_marker: PathBuf,
}

/// How payloads are invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PayloadConfig {
    /// Argv that runs one phase. The payload is located through `module_path_env`.
    pub command: Vec<String>,
    /// Argv that prints the payload's version on stdout.
    pub version_command: Vec<String>,
    /// Argv that prints `{"gpg": bool}` for the path given as the last argument.
    /// Empty means the scoped-keyring validator answers instead.
    pub verify_command: Vec<String>,
    /// Variable carrying the phase name to the child.
    pub phase_env: String,
    /// Module-search-path variable pointing the child at the payload.
    pub module_path_env: String,
    /// Upper bound for version and verify commands.
    pub query_timeout_secs: u64,
    /// Captured phase output beyond this many bytes is dropped (still forwarded).
    pub output_limit_bytes: usize,
}

/// Detached-signature verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SignatureConfig {
    pub gpg_command: Vec<String>,
    pub gpgconf_command: Vec<String>,
    /// The one trusted public key.
    pub public_key: PathBuf,
    /// Parent of the disposable keyring directories.
    pub home_parent: PathBuf,
    pub timeout_secs: u64,
}

/// Upload retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub wait_secs: u64,
}

/// Account used for demoted phases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrivilegeConfig {
    pub account: String,
    /// Refuse to start when `account` does not exist instead of running undemoted.
    pub require_account: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            gpg: true,
            paths: PathsConfig::default(),
            payload: PayloadConfig::default(),
            signature: SignatureConfig::default(),
            upload: UploadConfig::default(),
            privilege: PrivilegeConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            newest_payload: PathBuf::from("/var/lib/insights/newest.egg"),
            stable_payload: PathBuf::from("/var/lib/insights/last_stable.egg"),
            vendor_payload: PathBuf::from("/etc/insights-client/rpm.egg"),
            motd_source: PathBuf::from("/etc/insights-client/insights-client.motd"),
            motd_file: PathBuf::from("/etc/motd.d/insights-client"),
            registered_marker: PathBuf::from("/etc/insights-client/.registered"),
            unregistered_marker: PathBuf::from("/etc/insights-client/.unregistered"),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        let python = "/usr/bin/python3".to_string();
        Self {
            command: vec![
                python.clone(),
                "/usr/libexec/insights-client/run.py".to_string(),
            ],
            version_command: vec![
                python.clone(),
                "-c".to_string(),
                "from insights.client import InsightsClient; \
                 print(InsightsClient(None, False).version())"
                    .to_string(),
            ],
            verify_command: vec![
                python,
                "-c".to_string(),
                "import json, sys; from insights.client import InsightsClient; \
                 print(json.dumps(InsightsClient(None, False).verify(sys.argv[1])))"
                    .to_string(),
            ],
            phase_env: "INSIGHTS_PHASE".to_string(),
            module_path_env: "PYTHONPATH".to_string(),
            query_timeout_secs: 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            gpg_command: vec!["/usr/bin/gpg".to_string()],
            gpgconf_command: vec!["/usr/bin/gpgconf".to_string()],
            public_key: PathBuf::from("/etc/insights-client/redhattools.pub.gpg"),
            // gpg needs a writable home that the SELinux policy allows.
            home_parent: PathBuf::from("/var/lib/insights"),
            timeout_secs: 60,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_secs: 180,
        }
    }
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            account: "insights".to_string(),
            require_account: false,
        }
    }
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<(), BootstrapError> {
        let invalid = |reason: &str| {
            Err(BootstrapError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if is_empty_command(&self.payload.command) {
            return invalid("payload.command must be a non-empty array");
        }
        if is_empty_command(&self.payload.version_command) {
            return invalid("payload.version_command must be a non-empty array");
        }
        if self.payload.phase_env.trim().is_empty()
            || self.payload.module_path_env.trim().is_empty()
        {
            return invalid("payload.phase_env and payload.module_path_env must be set");
        }
        if self.payload.query_timeout_secs == 0 {
            return invalid("payload.query_timeout_secs must be > 0");
        }
        if self.payload.output_limit_bytes == 0 {
            return invalid("payload.output_limit_bytes must be > 0");
        }
        if is_empty_command(&self.signature.gpg_command)
            || is_empty_command(&self.signature.gpgconf_command)
        {
            return invalid(
                "signature.gpg_command and signature.gpgconf_command must be non-empty arrays",
            );
        }
        if self.signature.timeout_secs == 0 {
            return invalid("signature.timeout_secs must be > 0");
        }
        if self.upload.max_attempts == 0 {
            return invalid("upload.max_attempts must be > 0");
        }
        Ok(())
    }
}

fn is_empty_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BootstrapConfig::default()`.
pub fn load_config(path: &Path) -> Result<BootstrapConfig> {
    if !path.exists() {
        let cfg = BootstrapConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BootstrapConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Values taken from the process environment once, at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    pub payload_override: Option<PathBuf>,
    pub bypass_signature: bool,
    pub debug: bool,
}

impl RuntimeOverrides {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut overrides = Self::default();
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                PAYLOAD_OVERRIDE_ENV if !value.is_empty() => {
                    overrides.payload_override = Some(PathBuf::from(value));
                }
                BYPASS_SIGNATURE_ENV => overrides.bypass_signature = is_true(value),
                DEBUG_ENV => overrides.debug = is_true(value),
                _ => {}
            }
        }
        overrides
    }
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BootstrapConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bootstrap.toml");
        fs::write(
            &path,
            "gpg = false\n\n[upload]\nmax_attempts = 5\n\n[privilege]\naccount = \"nobody\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert!(!cfg.gpg);
        assert_eq!(cfg.upload.max_attempts, 5);
        assert_eq!(cfg.upload.wait_secs, 180);
        assert_eq!(cfg.privilege.account, "nobody");
        assert_eq!(cfg.paths, PathsConfig::default());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bootstrap.toml");
        fs::write(&path, "[upload]\nmax_attempts = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("upload.max_attempts"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut cfg = BootstrapConfig::default();
        cfg.payload.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_read_known_variables() {
        let overrides = RuntimeOverrides::from_vars([
            ("EGG", "/tmp/dev.egg"),
            ("BYPASS_GPG", "True"),
            ("INSIGHTS_DEBUG", "no"),
            ("PATH", "/usr/bin"),
        ]);
        assert_eq!(overrides.payload_override, Some(PathBuf::from("/tmp/dev.egg")));
        assert!(overrides.bypass_signature);
        assert!(!overrides.debug);
    }

    #[test]
    fn bypass_is_never_the_default() {
        let overrides = RuntimeOverrides::from_vars(Vec::<(String, String)>::new());
        assert_eq!(overrides, RuntimeOverrides::default());
        assert!(!overrides.bypass_signature);

        let empty_egg = RuntimeOverrides::from_vars([("EGG", ""), ("BYPASS_GPG", "1")]);
        assert_eq!(empty_egg.payload_override, None);
        assert!(!empty_egg.bypass_signature);
    }
}
