//! svidcar Library
//!
//! Keeps a SPIFFE JWT-SVID on disk for a co-located workload and renews it
//! before it expires.
//!
//! This library provides the components the `svidcar` binary wires together:
//!
//! - **Credential source**: fetch and locally validate a JWT-SVID from the agent
//! - **Scheduling**: adaptive renewal interval bounded by the remaining lifetime
//! - **Renewal loop**: fetch, persist, schedule, wait; terminal on failure
//! - **Escalation**: exit directly or delete the hosting pod first
//! - **Health**: `GET /started` readiness endpoint
//!
//! # Example
//!
//! ```ignore
//! use svidcar::{CredentialFile, ReadinessFlag, RenewalLoop, RenewalScheduler, WorkloadApiSource};
//! use svidcar_workload_api::AgentAddress;
//!
//! let source = WorkloadApiSource::new(AgentAddress::parse("/run/spire/agent.sock")?, "vault");
//! let mut renewal = RenewalLoop::new(
//!     source,
//!     CredentialFile::new("/var/run/secrets/svid/token"),
//!     RenewalScheduler::new(None),
//!     ReadinessFlag::new(),
//! );
//! let failure = renewal.run().await;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod app;
pub mod config;
pub mod credential;
pub mod errors;
pub mod escalation;
pub mod health;
pub mod orchestrator;
pub mod readiness;
pub mod renewal;
pub mod schedule;
pub mod source;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Run modes
pub use app::{run_daemon, run_once, RunOutcome};

// Configuration
pub use config::{ConfigError, EscalationKind, LogFormat, SidecarArgs, SidecarConfig};

// Credentials
pub use credential::Credential;
pub use source::{CredentialSource, WorkloadApiSource};
pub use storage::CredentialFile;

// Renewal
pub use errors::{Phase, RenewalError};
pub use renewal::{RenewalCycle, RenewalLoop, RenewalState};
pub use schedule::{Clock, RenewalScheduler, SystemClock};

// Escalation
pub use escalation::{EscalationOutcome, EscalationStrategy, Escalator};
pub use orchestrator::{ExecutionUnit, KubernetesClient, Orchestrator, OrchestratorError};

// Health
pub use health::HealthServer;
pub use readiness::ReadinessFlag;
