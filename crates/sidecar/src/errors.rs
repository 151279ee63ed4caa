//! Renewal failure taxonomy.
//!
//! Every failure in the renewal path is terminal for the process: there is no
//! in-process retry. The variant decides what gets logged and which phase is
//! reported; the escalation strategy decides how the process goes away.

use std::path::PathBuf;

use svidcar_workload_api::WorkloadApiError;
use thiserror::Error;

/// Where in the renewal cycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Validate,
    Persist,
    Escalate,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Fetch => "fetch",
            Phase::Validate => "validate",
            Phase::Persist => "persist",
            Phase::Escalate => "escalate",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renewal and escalation failures
#[derive(Error, Debug)]
pub enum RenewalError {
    /// The identity agent could not be reached or did not answer in time.
    #[error("identity agent unreachable: {0}")]
    AgentUnreachable(String),

    /// The agent answered with an error (e.g. audience not authorized).
    #[error("identity agent rejected the request: {0}")]
    FetchRejected(String),

    /// The returned token failed signature or claim verification.
    #[error("credential validation failed: {0}")]
    ValidationFailed(String),

    /// The token could not be written to its configured path.
    #[error("failed to write credential to {}: {source}", path.display())]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The orchestrator refused or failed the self-deletion request.
    #[error("escalation failed: {0}")]
    EscalationFailed(String),
}

impl RenewalError {
    pub fn phase(&self) -> Phase {
        match self {
            RenewalError::AgentUnreachable(_) | RenewalError::FetchRejected(_) => Phase::Fetch,
            RenewalError::ValidationFailed(_) => Phase::Validate,
            RenewalError::PersistFailed { .. } => Phase::Persist,
            RenewalError::EscalationFailed(_) => Phase::Escalate,
        }
    }
}

impl From<WorkloadApiError> for RenewalError {
    fn from(err: WorkloadApiError) -> Self {
        if err.is_unreachable() {
            RenewalError::AgentUnreachable(err.to_string())
        } else if err.is_validation() {
            RenewalError::ValidationFailed(err.to_string())
        } else {
            RenewalError::FetchRejected(err.to_string())
        }
    }
}
