//! One-shot bootstrap steps run before the console serves traffic.
//!
//! The steps are ordered: [`probe`] gates [`provision`], which gates serving. Each step runs once
//! per invocation and any failure is fatal; retrying is the job of whatever re-invokes the binary.
//!
//! - [`probe`]: a single, timeout-bounded connection to the administrative database
//! - [`provision`]: idempotent `CREATE DATABASE` for the application database
//! - [`wait_until_ready`]: an opt-in retry loop over [`probe`] for the `wait` command

pub mod errors;
pub mod probe;
pub mod provision;
pub mod target;

use std::{io::Write, process::ExitCode, time::Duration};
use tracing::info;

pub use errors::{ConnectErrorKind, ConnectFailure, Error, ProvisionFailure};
pub use probe::{probe, wait_until_ready};
pub use provision::{ProvisionOutcome, provision};
pub use target::{ConnectionTarget, Engine};

use crate::config::Config;

/// Write the result of a bootstrap command as exactly one line to `out` and map it to an exit code.
///
/// Success prints `OK`. Failure prints the error's diagnostic with any line breaks folded into
/// spaces, since server messages can span lines.
pub fn report(result: Result<(), Error>, out: &mut impl Write) -> ExitCode {
    let (line, code) = match result {
        Ok(()) => ("OK".to_string(), ExitCode::SUCCESS),
        Err(e) => (e.diagnostic().replace(['\r', '\n'], " "), ExitCode::FAILURE),
    };
    if let Err(e) = writeln!(out, "{line}") {
        tracing::error!("Failed to write bootstrap result: {}", e);
        return ExitCode::FAILURE;
    }
    code
}

/// The `probe` command.
pub async fn run_probe(config: &Config) -> Result<(), Error> {
    let target = config.connection_target()?;
    probe(&target, config.probe.timeout).await?;
    Ok(())
}

/// The `wait` command: probe until ready or `deadline` has passed.
pub async fn run_wait(config: &Config, deadline: Duration, interval: Duration) -> Result<(), Error> {
    let target = config.connection_target()?;
    let attempts = wait_until_ready(&target, config.probe.timeout, interval, deadline).await?;
    info!(attempts, "Database is ready");
    Ok(())
}

/// The `provision` command. `AlreadyExists` is reported as success.
pub async fn run_provision(config: &Config) -> Result<ProvisionOutcome, Error> {
    let target = config.connection_target()?;
    let outcome = provision(&target, target.app_database()).await;
    if outcome.is_success() {
        info!(
            "Console database URL: {}",
            target.redacted_url(target.app_database())
        );
    }
    match outcome {
        ProvisionOutcome::Failed(failure) => Err(failure.into()),
        outcome => Ok(outcome),
    }
}
