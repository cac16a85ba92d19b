//! Keeps the "not registered" MOTD symlink in line with the registration markers.
//!
//! The markers are written by the payload. This module only reads them and
//! creates or removes the symlink. Several hosts' worth of invocations may
//! race here, so failures are logged and ignored.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::io::config::PathsConfig;

const DISCARD_DEVICE: &str = "/dev/null";

/// Files involved in the MOTD update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotdPaths {
    /// Message shown while the host is neither registered nor unregistered.
    pub source: PathBuf,
    /// Symlink in the MOTD directory.
    pub target: PathBuf,
    pub registered_marker: PathBuf,
    pub unregistered_marker: PathBuf,
}

impl MotdPaths {
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            source: paths.motd_source.clone(),
            target: paths.motd_file.clone(),
            registered_marker: paths.registered_marker.clone(),
            unregistered_marker: paths.unregistered_marker.clone(),
        }
    }
}

/// What [`update_motd`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotdAction {
    /// The MOTD directory does not exist.
    NoDirectory,
    /// The target points at the discard device: the operator opted out.
    OptedOut,
    Linked,
    AlreadyLinked,
    Removed,
    AlreadyAbsent,
    /// Creating or removing the link failed, most likely a concurrent run.
    Raced,
}

/// Bring the MOTD symlink in line with the registration markers. Idempotent.
pub fn update_motd(paths: &MotdPaths) -> MotdAction {
    let Some(dir) = paths.target.parent() else {
        return MotdAction::NoDirectory;
    };
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "MOTD directory does not exist, ignoring update");
        return MotdAction::NoDirectory;
    }
    if points_at_discard_device(&paths.target) {
        debug!(
            target = %paths.target.display(),
            "MOTD file points at the discard device, ignoring update"
        );
        return MotdAction::OptedOut;
    }

    let show_message = !paths.registered_marker.exists() && !paths.unregistered_marker.exists();
    let present = lexists(&paths.target);

    match (show_message, present) {
        (true, true) => {
            debug!(
                target = %paths.target.display(),
                "no registration marker; MOTD already present"
            );
            MotdAction::AlreadyLinked
        }
        (true, false) => match std::os::unix::fs::symlink(&paths.source, &paths.target) {
            Ok(()) => {
                debug!(
                    source = %paths.source.display(),
                    target = %paths.target.display(),
                    "no registration marker; linked MOTD"
                );
                MotdAction::Linked
            }
            Err(err) => raced("link", &paths.target, &err),
        },
        (false, true) => match fs::remove_file(&paths.target) {
            Ok(()) => {
                debug!(
                    target = %paths.target.display(),
                    "registration marker present; removed MOTD"
                );
                MotdAction::Removed
            }
            Err(err) => raced("remove", &paths.target, &err),
        },
        (false, false) => {
            debug!(
                target = %paths.target.display(),
                "registration marker present; MOTD already absent"
            );
            MotdAction::AlreadyAbsent
        }
    }
}

fn raced(op: &str, target: &Path, err: &io::Error) -> MotdAction {
    debug!(op, target = %target.display(), err = %err, "could not update MOTD");
    MotdAction::Raced
}

/// Present as anything, including a dangling symlink.
fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn points_at_discard_device(path: &Path) -> bool {
    let (Ok(target), Ok(discard)) = (fs::metadata(path), fs::metadata(DISCARD_DEVICE)) else {
        return false;
    };
    target.dev() == discard.dev() && target.ino() == discard.ino()
}
