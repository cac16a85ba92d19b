//! Privilege demotion for phases that do not need root.

use std::os::unix::process::CommandExt;
use std::process::Command;

use tracing::{debug, warn};

use crate::core::types::Phase;
use crate::error::BootstrapError;

/// Identity a demoted child switches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demotion {
    pub uid: u32,
    pub gid: u32,
}

impl Demotion {
    /// Make `cmd` switch identity in the child before exec.
    ///
    /// The group is set first: once the user id is dropped the child can no
    /// longer change its group. std also clears supplementary groups when a
    /// root parent sets a uid.
    pub fn apply(self, cmd: &mut Command) {
        cmd.gid(self.gid);
        cmd.uid(self.uid);
    }
}

/// Decides per phase whether the child runs as the service account.
///
/// Account lookup and the privilege check happen once, when the value is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeDemoter {
    account: Option<Demotion>,
    privileged: bool,
}

impl PrivilegeDemoter {
    pub fn new(account: Option<Demotion>, privileged: bool) -> Self {
        Self {
            account,
            privileged,
        }
    }

    /// Look up `name` in the passwd database and check whether we run as root.
    ///
    /// A missing account is a warning (phases run unchanged) unless `required`.
    pub fn resolve(name: &str, required: bool) -> Result<Self, BootstrapError> {
        let account = match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Some(Demotion {
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(account = name, err = %err, "passwd lookup failed");
                None
            }
        };
        if account.is_none() {
            if required {
                return Err(BootstrapError::AccountMissing {
                    name: name.to_string(),
                });
            }
            warn!(
                account = name,
                "account not found; every phase will run with the current identity"
            );
        }
        let privileged = nix::unistd::geteuid().is_root();
        debug!(
            account = name,
            resolved = account.is_some(),
            privileged,
            "resolved demotion account"
        );
        Ok(Self::new(account, privileged))
    }

    /// Identity to switch to for `phase`, or `None` to keep the current one.
    pub fn demotion_for(&self, phase: Phase) -> Option<Demotion> {
        if phase.run_as_root() || !self.privileged {
            return None;
        }
        self.account
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: Demotion = Demotion { uid: 977, gid: 975 };

    #[test]
    fn root_phases_are_never_demoted() {
        let demoter = PrivilegeDemoter::new(Some(ACCOUNT), true);
        for phase in [Phase::PreUpdate, Phase::Update, Phase::PostUpdate, Phase::Collect] {
            assert_eq!(demoter.demotion_for(phase), None, "{phase}");
        }
    }

    #[test]
    fn network_phases_are_demoted_when_root() {
        let demoter = PrivilegeDemoter::new(Some(ACCOUNT), true);
        assert_eq!(demoter.demotion_for(Phase::Upload), Some(ACCOUNT));
        assert_eq!(demoter.demotion_for(Phase::Checkin), Some(ACCOUNT));
    }

    #[test]
    fn unprivileged_caller_is_left_alone() {
        let demoter = PrivilegeDemoter::new(Some(ACCOUNT), false);
        assert_eq!(demoter.demotion_for(Phase::Upload), None);
    }

    #[test]
    fn missing_account_is_left_alone() {
        let demoter = PrivilegeDemoter::new(None, true);
        assert_eq!(demoter.demotion_for(Phase::Upload), None);
    }

    #[test]
    fn unknown_account_warns_unless_required() {
        let name = "no-such-account-for-bootstrap-tests";
        let demoter = PrivilegeDemoter::resolve(name, false).expect("resolve");
        assert_eq!(demoter.demotion_for(Phase::Upload), None);

        let err = PrivilegeDemoter::resolve(name, true).unwrap_err();
        assert!(matches!(err, BootstrapError::AccountMissing { .. }));
    }

    #[test]
    fn root_account_resolves() {
        let demoter = PrivilegeDemoter::resolve("root", true).expect("resolve root");
        if nix::unistd::geteuid().is_root() {
            assert_eq!(
                demoter.demotion_for(Phase::Upload),
                Some(Demotion { uid: 0, gid: 0 })
            );
        } else {
            assert_eq!(demoter.demotion_for(Phase::Upload), None);
        }
    }
}
