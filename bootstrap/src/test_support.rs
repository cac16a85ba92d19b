//! Test-only fakes and fixtures.
//!
//! Everything here runs without gpg, python, or root: gpg is replaced by
//! small `/bin/sh` scripts and phases by scripted executors.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::types::{ExecutionAttempt, Phase};
use crate::io::config::SignatureConfig;
use crate::io::executor::PhaseExecutor;
use crate::io::motd::MotdPaths;
use crate::io::ranker::VersionLookup;
use crate::io::signature::{SignatureCheck, SignatureValidator};
use crate::io::verifier::{PayloadVerifier, Verification};
use crate::upload::Sleeper;

/// Content of a detached signature the fake gpg accepts.
pub const GOOD_SIGNATURE: &str = "good-signature\n";

// Invoked as `gpg --homedir HOME --import KEY` or `gpg --homedir HOME --verify SIG PAYLOAD`.
const FAKE_GPG: &str = r#"home="$2"
case "$3" in
  --import)
    test -f "$4" || exit 2
    touch "$home/pubring.kbx"
    ;;
  --verify)
    test -f "$home/pubring.kbx" || exit 2
    test -f "$5" || exit 2
    grep -q '^good-signature$' "$4" || exit 1
    ;;
  *)
    exit 2
    ;;
esac
"#;

// Invoked as `gpgconf --homedir HOME --kill all`.
const FAKE_GPGCONF: &str = r#"echo "$2" >> "$(dirname "$0")/agent-kills.log"
"#;

/// Create an empty file, including parent directories.
pub fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, "").with_context(|| format!("write {}", path.display()))
}

/// Write a `/bin/sh` script body. It is run as `/bin/sh <path>`, never exec'd directly.
pub fn write_script(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, format!("#!/bin/sh\n{body}"))
        .with_context(|| format!("write {}", path.display()))
}

/// A gpg/gpgconf pair backed by shell scripts in a temp directory.
pub struct FakeGpg {
    dir: TempDir,
    home_parent: PathBuf,
}

impl FakeGpg {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create fake gpg dir")?;
        let root = dir.path();
        write_script(&root.join("gpg.sh"), FAKE_GPG)?;
        write_script(&root.join("gpgconf.sh"), FAKE_GPGCONF)?;
        fs::write(root.join("trusted.pub"), "trusted key\n").context("write public key")?;
        let home_parent = root.join("keyrings");
        fs::create_dir(&home_parent).context("create keyring parent")?;
        Ok(Self { dir, home_parent })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn home_parent(&self) -> &Path {
        &self.home_parent
    }

    pub fn public_key(&self) -> PathBuf {
        self.root().join("trusted.pub")
    }

    pub fn config(&self) -> SignatureConfig {
        let sh = "/bin/sh".to_string();
        SignatureConfig {
            gpg_command: vec![sh.clone(), self.root().join("gpg.sh").display().to_string()],
            gpgconf_command: vec![sh, self.root().join("gpgconf.sh").display().to_string()],
            public_key: self.public_key(),
            home_parent: self.home_parent.clone(),
            timeout_secs: 10,
        }
    }

    pub fn validator(&self, bypass: bool) -> SignatureValidator {
        SignatureValidator::new(&self.config(), bypass)
    }

    /// Payload with a detached signature the fake gpg accepts (`valid`) or rejects.
    pub fn signed_payload(&self, name: &str, valid: bool) -> Result<PathBuf> {
        let payload = self.unsigned_payload(name)?;
        let signature = crate::core::types::signature_path(&payload);
        let body = if valid { GOOD_SIGNATURE } else { "tampered\n" };
        fs::write(&signature, body).with_context(|| format!("write {}", signature.display()))?;
        Ok(payload)
    }

    pub fn unsigned_payload(&self, name: &str) -> Result<PathBuf> {
        let payload = self.root().join(name);
        fs::write(&payload, format!("payload {name}\n"))
            .with_context(|| format!("write {}", payload.display()))?;
        Ok(payload)
    }

    /// Keyring homes passed to `gpgconf --kill`, in call order.
    pub fn agent_kills(&self) -> Result<Vec<String>> {
        let log = self.root().join("agent-kills.log");
        if !log.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&log).with_context(|| format!("read {}", log.display()))?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// Version lookup answering from a fixed map; unknown paths have no version.
pub struct MapVersionLookup {
    versions: HashMap<PathBuf, String>,
    calls: Cell<usize>,
}

impl MapVersionLookup {
    pub fn new<'a, I>(versions: I) -> Self
    where
        I: IntoIterator<Item = (&'a PathBuf, &'a str)>,
    {
        Self {
            versions: versions
                .into_iter()
                .map(|(path, version)| (path.clone(), version.to_string()))
                .collect(),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VersionLookup for MapVersionLookup {
    fn version(&self, payload: &Path) -> Option<String> {
        self.calls.set(self.calls.get() + 1);
        self.versions.get(payload).cloned()
    }
}

/// Signature check accepting exactly the given paths.
pub struct SetSignatureCheck {
    valid: HashSet<PathBuf>,
}

impl SetSignatureCheck {
    pub fn new<'a, I>(valid: I) -> Self
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        Self {
            valid: valid.into_iter().cloned().collect(),
        }
    }
}

impl SignatureCheck for SetSignatureCheck {
    fn validate(&self, payload: &Path) -> bool {
        self.valid.contains(payload)
    }
}

impl PayloadVerifier for SetSignatureCheck {
    fn verify(&self, payload: &Path) -> Verification {
        Verification {
            gpg: self.validate(payload),
        }
    }
}

/// Scripted exit for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedExit {
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ScriptedExit {
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            output: String::new(),
        }
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn signal() -> Self {
        Self {
            exit_code: None,
            output: String::new(),
        }
    }
}

/// Executor returning scripted exits without spawning anything.
///
/// Lookup order: queued exits for `(phase, payload)`, then the payload default,
/// then success.
#[derive(Default)]
pub struct ScriptedPhaseExecutor {
    queued: RefCell<HashMap<(Phase, PathBuf), VecDeque<ScriptedExit>>>,
    defaults: HashMap<PathBuf, ScriptedExit>,
    calls: RefCell<Vec<(Phase, PathBuf)>>,
}

impl ScriptedPhaseExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every phase run with `payload` exits this way unless something is queued.
    pub fn always(mut self, payload: &Path, exit: ScriptedExit) -> Self {
        self.defaults.insert(payload.to_path_buf(), exit);
        self
    }

    /// Queue exits for successive runs of `phase` with `payload`.
    pub fn queue<I>(self, phase: Phase, payload: &Path, exits: I) -> Self
    where
        I: IntoIterator<Item = ScriptedExit>,
    {
        self.queued
            .borrow_mut()
            .entry((phase, payload.to_path_buf()))
            .or_default()
            .extend(exits);
        self
    }

    pub fn calls(&self) -> Vec<(Phase, PathBuf)> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, phase: Phase) -> Vec<PathBuf> {
        self.calls
            .borrow()
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

impl PhaseExecutor for ScriptedPhaseExecutor {
    fn execute(&self, phase: Phase, payload: &Path) -> Result<ExecutionAttempt> {
        self.calls.borrow_mut().push((phase, payload.to_path_buf()));
        let queued = self
            .queued
            .borrow_mut()
            .get_mut(&(phase, payload.to_path_buf()))
            .and_then(VecDeque::pop_front);
        let exit = queued
            .or_else(|| self.defaults.get(payload).cloned())
            .unwrap_or_else(|| ScriptedExit::code(0));
        Ok(ExecutionAttempt {
            phase,
            payload: payload.to_path_buf(),
            exit_code: exit.exit_code,
            stdout: Vec::new(),
            stderr: exit.output.into_bytes(),
        })
    }
}

/// Sleeper that records requested waits instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}

/// A MOTD layout under a temp directory: message file and `motd.d` exist,
/// no markers, no link.
pub struct MotdFixture {
    dir: TempDir,
    paths: MotdPaths,
}

impl MotdFixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create motd fixture")?;
        let etc = dir.path().join("etc");
        let client = etc.join("insights-client");
        fs::create_dir_all(&client).with_context(|| format!("create {}", client.display()))?;
        fs::create_dir_all(etc.join("motd.d")).context("create motd.d")?;
        let source = client.join("insights-client.motd");
        fs::write(
            &source,
            "Register this system with Red Hat Insights: insights-client --register\n",
        )
        .with_context(|| format!("write {}", source.display()))?;
        let paths = MotdPaths {
            source,
            target: etc.join("motd.d").join("insights-client"),
            registered_marker: client.join(".registered"),
            unregistered_marker: client.join(".unregistered"),
        };
        Ok(Self { dir, paths })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &MotdPaths {
        &self.paths
    }

    /// The link exists and resolves to the message.
    pub fn message_present(&self) -> bool {
        self.paths.target.exists()
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.path().join("etc").join("insights-client").join(name)
    }

    pub fn touch_marker(&self, name: &str) -> Result<()> {
        touch(&self.marker(name))
    }

    pub fn remove_marker(&self, name: &str) -> Result<()> {
        let marker = self.marker(name);
        fs::remove_file(&marker).with_context(|| format!("remove {}", marker.display()))
    }
}
