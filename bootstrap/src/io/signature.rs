//! Detached-signature validation of payloads with a disposable gpg keyring.
//!
//! Every call builds its own keyring under the configured parent directory,
//! imports exactly one trusted key, verifies, and tears the keyring down again
//! (including the gpg agent it may have started) before returning.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use crate::core::types::signature_path;
use crate::io::config::SignatureConfig;
use crate::io::process::{CommandOutput, command_from, run_command_with_timeout};

/// Output kept from gpg runs, only used for diagnostics.
const GPG_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Answers "is this payload trusted?".
pub trait SignatureCheck {
    fn validate(&self, payload: &Path) -> bool;
}

/// Validates `<payload>.asc` against one trusted public key using gpg.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    gpg_command: Vec<String>,
    gpgconf_command: Vec<String>,
    public_key: PathBuf,
    home_parent: PathBuf,
    timeout: Duration,
    bypass: bool,
}

impl SignatureValidator {
    /// `bypass` must come from an explicit operator toggle; it makes every payload valid.
    pub fn new(config: &SignatureConfig, bypass: bool) -> Self {
        Self {
            gpg_command: config.gpg_command.clone(),
            gpgconf_command: config.gpgconf_command.clone(),
            public_key: config.public_key.clone(),
            home_parent: config.home_parent.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            bypass,
        }
    }

    fn gpg(&self, home: &Path) -> Command {
        let mut cmd = command_from(&self.gpg_command);
        cmd.arg("--homedir").arg(home);
        cmd
    }

    fn run_gpg(&self, cmd: Command, step: &str) -> Result<CommandOutput> {
        let output = run_command_with_timeout(cmd, self.timeout, GPG_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run gpg {step}"))?;
        if !output.succeeded() {
            debug!(
                step,
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "gpg step failed"
            );
        }
        Ok(output)
    }

    fn verify_with_keyring(&self, payload: &Path, signature: &Path) -> Result<bool> {
        let keyring =
            ScopedKeyring::create(&self.home_parent, &self.gpgconf_command, self.timeout)?;

        let mut import = self.gpg(keyring.path());
        import.arg("--import").arg(&self.public_key);
        if !self.run_gpg(import, "import")?.succeeded() {
            return Ok(false);
        }

        let mut verify = self.gpg(keyring.path());
        verify.arg("--verify").arg(signature).arg(payload);
        let verified = self.run_gpg(verify, "verify")?.succeeded();
        Ok(verified)
    }
}

impl SignatureCheck for SignatureValidator {
    #[instrument(skip(self), fields(payload = %payload.display()))]
    fn validate(&self, payload: &Path) -> bool {
        if self.bypass {
            debug!("signature bypass is set, treating payload as valid");
            return true;
        }
        if !payload.is_file() {
            debug!("payload does not exist, cannot validate");
            return false;
        }
        let signature = signature_path(payload);
        if !signature.is_file() {
            debug!(signature = %signature.display(), "payload has no detached signature");
            return false;
        }

        match self.verify_with_keyring(payload, &signature) {
            Ok(valid) => {
                debug!(valid, "signature check finished");
                valid
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "signature check could not run");
                false
            }
        }
    }
}

/// Disposable gpg home. Dropping it stops the agent and deletes the directory.
struct ScopedKeyring {
    dir: TempDir,
    gpgconf_command: Vec<String>,
    timeout: Duration,
}

impl ScopedKeyring {
    fn create(parent: &Path, gpgconf_command: &[String], timeout: Duration) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("gpg-home-")
            .tempdir_in(parent)
            .with_context(|| format!("create keyring directory in {}", parent.display()))?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))
            .with_context(|| format!("restrict {}", dir.path().display()))?;
        Ok(Self {
            dir,
            gpgconf_command: gpgconf_command.to_vec(),
            timeout,
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for ScopedKeyring {
    fn drop(&mut self) {
        let mut kill = command_from(&self.gpgconf_command);
        kill.arg("--homedir").arg(self.dir.path()).args(["--kill", "all"]);
        match run_command_with_timeout(kill, self.timeout, GPG_OUTPUT_LIMIT_BYTES) {
            Ok(output) if output.succeeded() => {}
            Ok(output) => warn!(
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "could not stop the gpg agent"
            ),
            Err(err) => warn!(err = %format!("{err:#}"), "could not stop the gpg agent"),
        }
        // `TempDir` removes the directory when the field drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeGpg;

    fn residual_entries(dir: &Path) -> usize {
        fs::read_dir(dir).expect("read keyring parent").count()
    }

    #[test]
    fn valid_signature_is_accepted() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.signed_payload("stable.egg", true).expect("payload");

        assert!(gpg.validator(false).validate(&payload));
        assert_eq!(residual_entries(gpg.home_parent()), 0);
    }

    #[test]
    fn bad_signature_is_rejected_and_cleaned_up() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.signed_payload("stable.egg", false).expect("payload");

        assert!(!gpg.validator(false).validate(&payload));
        assert_eq!(residual_entries(gpg.home_parent()), 0);
    }

    #[test]
    fn missing_signature_fails_closed() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.unsigned_payload("newest.egg").expect("payload");

        assert!(!gpg.validator(false).validate(&payload));
        assert_eq!(residual_entries(gpg.home_parent()), 0);
    }

    #[test]
    fn missing_payload_fails_closed() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let missing = gpg.root().join("absent.egg");

        assert!(!gpg.validator(false).validate(&missing));
    }

    #[test]
    fn failed_key_import_rejects() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.signed_payload("stable.egg", true).expect("payload");
        fs::remove_file(gpg.public_key()).expect("remove key");

        assert!(!gpg.validator(false).validate(&payload));
        assert_eq!(residual_entries(gpg.home_parent()), 0);
    }

    #[test]
    fn agent_is_stopped_for_the_scoped_home() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.signed_payload("stable.egg", true).expect("payload");

        gpg.validator(false).validate(&payload);
        let kills = gpg.agent_kills().expect("read kill log");
        assert_eq!(kills.len(), 1);
        assert!(kills[0].starts_with(&gpg.home_parent().display().to_string()));
    }

    #[test]
    fn bypass_accepts_anything() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let missing = gpg.root().join("absent.egg");

        assert!(gpg.validator(true).validate(&missing));
        assert_eq!(residual_entries(gpg.home_parent()), 0);
    }

    #[test]
    fn unusable_keyring_parent_rejects() {
        let gpg = FakeGpg::new().expect("fake gpg");
        let payload = gpg.signed_payload("stable.egg", true).expect("payload");
        let mut config = gpg.config();
        config.home_parent = gpg.root().join("does-not-exist");

        assert!(!SignatureValidator::new(&config, false).validate(&payload));
    }
}
