//! Selection of the payloads every phase will try, in order.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::core::types::{Origin, Payload};
use crate::error::BootstrapError;
use crate::io::config::PathsConfig;
use crate::io::ranker::{VersionLookup, rank_payloads};
use crate::io::signature::SignatureCheck;

/// Candidate locations, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSources {
    pub environment_override: Option<PathBuf>,
    pub newest: PathBuf,
    pub stable: PathBuf,
    pub vendor: PathBuf,
}

impl PayloadSources {
    pub fn new(paths: &PathsConfig, environment_override: Option<PathBuf>) -> Self {
        Self {
            environment_override,
            newest: paths.newest_payload.clone(),
            stable: paths.stable_payload.clone(),
            vendor: paths.vendor_payload.clone(),
        }
    }
}

/// Build the ordered candidate list.
///
/// The environment override comes first when its signature is valid. The
/// packaged candidates follow, filtered by signature when `signing_enabled` and
/// ranked by version. An empty result, or one where no file exists, is a
/// configuration error: nothing trustworthy can run.
pub fn select_candidates<S: SignatureCheck, P: VersionLookup>(
    sources: &PayloadSources,
    validator: &S,
    lookup: &P,
    signing_enabled: bool,
) -> Result<Vec<Payload>, BootstrapError> {
    let mut selected = Vec::new();

    if let Some(path) = &sources.environment_override {
        if validator.validate(path) {
            debug!(payload = %path.display(), "using environment override payload");
            selected.push(Payload::new(path.clone(), Origin::EnvironmentOverride));
        } else {
            warn!(payload = %path.display(), "environment override payload failed validation");
        }
    }

    let packaged = [
        Payload::new(sources.newest.clone(), Origin::Newest),
        Payload::new(sources.stable.clone(), Origin::Stable),
        Payload::new(sources.vendor.clone(), Origin::Vendor),
    ];
    let accepted: Vec<Payload> = packaged
        .into_iter()
        .filter(|payload| {
            if !signing_enabled {
                return true;
            }
            let valid = validator.validate(&payload.path);
            if !valid {
                debug!(
                    payload = %payload.path.display(),
                    origin = %payload.origin,
                    "excluding unverified payload"
                );
            }
            valid
        })
        .collect();
    selected.extend(rank_payloads(lookup, accepted));

    if !selected.iter().any(Payload::exists) {
        return Err(BootstrapError::NoValidPayloads);
    }
    let payloads: Vec<String> = selected.iter().map(|p| p.path.display().to_string()).collect();
    info!(payloads = %payloads.join(":"), "using payloads");
    Ok(selected)
}
