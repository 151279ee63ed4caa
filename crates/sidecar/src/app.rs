//! Run modes
//!
//! One-shot mode runs a single `Renewing` step and reports it; nothing else
//! is started. Daemon mode serves the health endpoint next to the renewal
//! loop and hands the loop's terminal failure to escalation. A shutdown
//! signal ends either phase of daemon mode.

use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::errors::RenewalError;
use crate::escalation::{EscalationOutcome, Escalator};
use crate::health::HealthServer;
use crate::renewal::RenewalLoop;
use crate::schedule::Clock;
use crate::source::CredentialSource;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// One-shot: the credential was written.
    Renewed,
    /// One-shot: the single cycle failed.
    RenewalFailed(RenewalError),
    /// Daemon: a shutdown signal arrived while renewing.
    Stopped(&'static str),
    /// Daemon: renewal failed and escalation ran to completion.
    Escalated(EscalationOutcome),
    /// Daemon: a shutdown signal arrived while escalation was in progress.
    StoppedDuringEscalation(&'static str),
    /// Daemon: the health endpoint task ended.
    HealthStopped(String),
}

impl RunOutcome {
    /// Process exit status.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Renewed | Self::Stopped(_) => ExitCode::SUCCESS,
            Self::Escalated(outcome) => outcome.exit_code(),
            Self::RenewalFailed(_) | Self::StoppedDuringEscalation(_) | Self::HealthStopped(_) => {
                ExitCode::FAILURE
            }
        }
    }
}

/// Fetch and persist once.
pub async fn run_once<S: CredentialSource, C: Clock>(mut renewal: RenewalLoop<S, C>) -> RunOutcome {
    match renewal.renew_once().await {
        Ok(cycle) => {
            let remaining = renewal.time_remaining(&cycle.credential);
            info!(
                subject = %cycle.credential.subject(),
                "Credential written, expires in {}",
                humantime::format_duration(Duration::from_secs(remaining.as_secs()))
            );
            RunOutcome::Renewed
        }
        Err(e) => {
            error!(phase = %e.phase(), error = %e, "Unable to fetch or write credential");
            RunOutcome::RenewalFailed(e)
        }
    }
}

/// Renew until failure while serving readiness probes, then escalate.
///
/// `health` must share its readiness flag with `renewal`. `shutdown`
/// resolves with the signal name when the process is asked to stop.
pub async fn run_daemon<S, C, F>(
    mut renewal: RenewalLoop<S, C>,
    health: HealthServer,
    escalator: &Escalator,
    shutdown: F,
) -> RunOutcome
where
    S: CredentialSource,
    C: Clock,
    F: Future<Output = &'static str>,
{
    let mut health_task = tokio::spawn(health.serve());
    tokio::pin!(shutdown);

    let failure = tokio::select! {
        failure = renewal.run() => failure,
        signal = &mut shutdown => {
            info!(signal, "Received shutdown signal, exiting");
            health_task.abort();
            return RunOutcome::Stopped(signal);
        }
        joined = &mut health_task => {
            let reason = match joined {
                Ok(()) => "health endpoint exited".to_string(),
                Err(e) => e.to_string(),
            };
            error!(reason = %reason, "Health endpoint stopped unexpectedly");
            return RunOutcome::HealthStopped(reason);
        }
    };

    // Pod deletion itself delivers SIGTERM during the pause
    let outcome = tokio::select! {
        outcome = escalator.escalate(&failure) => RunOutcome::Escalated(outcome),
        signal = &mut shutdown => {
            warn!(signal, "Received shutdown signal during escalation, exiting");
            RunOutcome::StoppedDuringEscalation(signal)
        }
    };

    health_task.abort();
    outcome
}
