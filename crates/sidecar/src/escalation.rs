//! Escalation on unrecoverable renewal failure
//!
//! Two terminal strategies, neither of which retries:
//!
//! - **Direct**: log and exit non-zero; the orchestrator restarts the container.
//! - **DeletePod**: ask the orchestrator to delete the pod (foreground
//!   propagation), then hold the process for a fixed pause before exiting so
//!   the container is not restarted in place ahead of the deletion.
//!
//! If the delete request itself fails there is nothing left to wait for and
//! the process exits immediately.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::errors::RenewalError;
use crate::orchestrator::{ExecutionUnit, Orchestrator};

/// Hold time after a successful self-deletion request.
pub const SELF_DELETE_PAUSE: Duration = Duration::from_secs(60);

/// Escalation strategy selected by deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationStrategy {
    /// Exit non-zero and rely on a container restart.
    Direct,
    /// Delete the hosting pod, pause, then exit non-zero.
    DeletePod(ExecutionUnit),
}

/// Which terminal path ran.
#[derive(Debug)]
pub enum EscalationOutcome {
    /// Exited directly.
    Exited,
    /// Deletion was accepted and the pause elapsed.
    UnitDeleted,
    /// The deletion request failed; exited without pausing.
    Failed(RenewalError),
}

impl EscalationOutcome {
    /// Process exit status for this outcome. Always a failure.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::FAILURE
    }
}

/// Applies the configured strategy to a terminal renewal failure.
pub struct Escalator {
    /// Unit to delete and the client to delete it with; `None` means Direct.
    self_delete: Option<(ExecutionUnit, Arc<dyn Orchestrator>)>,
    pause: Duration,
}

impl Escalator {
    /// Direct strategy; no orchestrator involved.
    pub fn direct() -> Self {
        Self {
            self_delete: None,
            pause: SELF_DELETE_PAUSE,
        }
    }

    /// Self-deletion of `unit` through `orchestrator`.
    pub fn delete_pod(unit: ExecutionUnit, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            self_delete: Some((unit, orchestrator)),
            pause: SELF_DELETE_PAUSE,
        }
    }

    /// Override the post-deletion pause.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn strategy(&self) -> EscalationStrategy {
        match &self.self_delete {
            Some((unit, _)) => EscalationStrategy::DeletePod(unit.clone()),
            None => EscalationStrategy::Direct,
        }
    }

    /// Run the terminal action for `failure`. Returns once the process
    /// should exit.
    pub async fn escalate(&self, failure: &RenewalError) -> EscalationOutcome {
        match &self.self_delete {
            Some((unit, orchestrator)) => {
                self.delete_and_pause(unit, orchestrator.as_ref(), failure).await
            }
            None => {
                error!(
                    phase = %failure.phase(),
                    error = %failure,
                    "Unable to fetch or write credential, shutting down"
                );
                EscalationOutcome::Exited
            }
        }
    }

    async fn delete_and_pause(
        &self,
        unit: &ExecutionUnit,
        orchestrator: &dyn Orchestrator,
        failure: &RenewalError,
    ) -> EscalationOutcome {
        warn!(
            pod = %unit,
            phase = %failure.phase(),
            error = %failure,
            "Credential renewal failed, deleting pod"
        );

        if let Err(e) = orchestrator.delete_unit(unit).await {
            let err = RenewalError::EscalationFailed(e.to_string());
            error!(pod = %unit, error = %err, "Failed to delete pod, exiting");
            return EscalationOutcome::Failed(err);
        }

        info!(
            pod = %unit,
            pause_secs = self.pause.as_secs(),
            "Pod deletion requested, waiting before exit"
        );
        tokio::time::sleep(self.pause).await;

        EscalationOutcome::UnitDeleted
    }
}

impl std::fmt::Debug for Escalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Escalator")
            .field("strategy", &self.strategy())
            .field("pause", &self.pause)
            .finish()
    }
}
