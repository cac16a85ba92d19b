//! `insights-client` bootstrap.
//!
//! Selects a trusted payload and runs the client phases with it. Options not
//! listed here belong to the payload and are passed through untouched.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::debug;

use insights_bootstrap::candidates::{PayloadSources, select_candidates};
use insights_bootstrap::core::types::Payload;
use insights_bootstrap::exit_codes;
use insights_bootstrap::io::config::{
    BootstrapConfig, DEFAULT_CONFIG_PATH, RuntimeOverrides, load_config,
};
use insights_bootstrap::io::executor::SubprocessPhaseExecutor;
use insights_bootstrap::io::motd::MotdPaths;
use insights_bootstrap::io::privilege::PrivilegeDemoter;
use insights_bootstrap::io::ranker::{SubprocessVersionLookup, VersionLookup};
use insights_bootstrap::io::signature::SignatureValidator;
use insights_bootstrap::io::verifier::{PayloadVerifier, SubprocessVerifier};
use insights_bootstrap::logging;
use insights_bootstrap::pipeline::{Entrypoint, Orchestrator};
use insights_bootstrap::upload::{RetryPolicy, ThreadSleeper};

#[derive(Parser, Debug)]
#[command(
    name = "insights-client",
    about = "Run the Insights client with a verified payload",
    disable_version_flag = true
)]
struct Cli {
    /// Bootstrap configuration file. Not passed to the payload.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Do not require signatures for the installed payloads.
    #[arg(long)]
    no_gpg: bool,
    /// Number of upload attempts.
    #[arg(long, value_name = "N")]
    retry: Option<u32>,
    /// Only check in with the service.
    #[arg(long)]
    checkin: bool,
    /// Print the client and payload versions.
    #[arg(long)]
    version: bool,
    /// Verbose diagnostics (also `INSIGHTS_DEBUG=true`).
    #[arg(long)]
    debug: bool,
    /// Remaining payload options. Bootstrap options must come first.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    payload_args: Vec<String>,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse();
    if let Some(flag) = misplaced_bootstrap_flag(&cli.payload_args) {
        bail!("'{flag}' must come before payload options");
    }
    let overrides = RuntimeOverrides::from_env();
    logging::init(cli.debug || overrides.debug);

    let config = load_config(&cli.config)?;
    let signing = config.gpg && !cli.no_gpg;
    debug!(
        config = %cli.config.display(),
        signing,
        payload_options = ?cli.payload_args,
        "loaded configuration"
    );

    let validator = SignatureValidator::new(&config.signature, overrides.bypass_signature);
    let lookup = SubprocessVersionLookup::new(&config.payload);
    let sources = PayloadSources::new(&config.paths, overrides.payload_override.clone());
    let candidates = select_candidates(&sources, &validator, &lookup, signing)?;

    if cli.version {
        print_versions(&lookup, &candidates);
        return Ok(exit_codes::OK);
    }

    let demoter =
        PrivilegeDemoter::resolve(&config.privilege.account, config.privilege.require_account)?;
    let executor =
        SubprocessPhaseExecutor::new(&config.payload, demoter, forwarded_args(&raw_args));
    let retry = RetryPolicy::from_config(&config.upload, cli.retry);
    let verifier = signing.then(|| payload_verifier(&config, validator, &candidates));

    let mut orchestrator = Orchestrator::new(candidates, executor, ThreadSleeper, retry)
        .with_motd(MotdPaths::from_config(&config.paths));
    if let Some(verifier) = verifier {
        orchestrator = orchestrator.with_verifier(verifier);
    }

    let entrypoint = if cli.checkin { Entrypoint::Checkin } else { Entrypoint::Pipeline };
    let outcome = orchestrator.run(entrypoint, |event| eprintln!("{event}"))?;
    Ok(outcome.exit_code)
}

fn print_versions<P: VersionLookup>(lookup: &P, candidates: &[Payload]) {
    println!("Client: {}", env!("CARGO_PKG_VERSION"));
    let core = candidates
        .iter()
        .find(|payload| payload.exists())
        .and_then(|payload| lookup.version(&payload.path))
        .unwrap_or_else(|| "unknown".to_string());
    println!("Core: {core}");
}

/// The loaded payload answers `verify(path)` when a verify command is set;
/// otherwise the keyring validator does.
fn payload_verifier(
    config: &BootstrapConfig,
    validator: SignatureValidator,
    candidates: &[Payload],
) -> Box<dyn PayloadVerifier> {
    let host = candidates.iter().find(|payload| payload.exists());
    match host {
        Some(host) if !config.payload.verify_command.is_empty() => {
            Box::new(SubprocessVerifier::new(&config.payload, host.path.clone()))
        }
        _ => Box::new(validator),
    }
}

/// A bootstrap option that ended up among the payload options, if any.
///
/// Arguments after `--` belong to the payload and are not checked.
fn misplaced_bootstrap_flag(payload_args: &[String]) -> Option<&str> {
    payload_args
        .iter()
        .map(String::as_str)
        .take_while(|arg| *arg != "--")
        .find(|arg| {
            let name = arg.split_once('=').map_or(*arg, |(name, _)| name);
            BOOTSTRAP_FLAGS.contains(&name)
        })
}

const BOOTSTRAP_FLAGS: [&str; 6] =
    ["--config", "--no-gpg", "--retry", "--checkin", "--version", "--debug"];

/// Everything on our command line except the bootstrap-only `--config`.
fn forwarded_args(raw: &[String]) -> Vec<String> {
    let mut forwarded = Vec::with_capacity(raw.len());
    let mut args = raw.iter();
    while let Some(arg) = args.next() {
        if arg == "--" {
            forwarded.extend(args.cloned());
            break;
        }
        if arg == "--config" {
            args.next();
            continue;
        }
        if arg.starts_with("--config=") {
            continue;
        }
        forwarded.push(arg.clone());
    }
    forwarded
}
