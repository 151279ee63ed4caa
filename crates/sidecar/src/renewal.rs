//! Renewal loop
//!
//! Drives the credential through its lifecycle:
//!
//! ```text
//! Initializing -> Renewing -> Waiting -> Renewing -> ... -> Terminating
//! ```
//!
//! `Renewing` fetches, writes, marks the process ready and computes the next
//! interval. Any failure there goes straight to `Terminating`; the loop never
//! retries in place. Recovery is a restart by the supervisor, triggered by the
//! escalation strategy the caller applies to the returned error.

use std::time::Duration;

use tracing::{debug, info};

use crate::credential::Credential;
use crate::errors::RenewalError;
use crate::readiness::ReadinessFlag;
use crate::schedule::{Clock, RenewalScheduler, SystemClock};
use crate::source::CredentialSource;
use crate::storage::CredentialFile;

/// Renewal loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalState {
    /// No credential fetched yet.
    Initializing,
    /// Fetching and persisting a credential.
    Renewing,
    /// Sleeping until the next renewal.
    Waiting,
    /// A renewal failed; terminal.
    Terminating,
}

/// Result of one successful `Renewing` step.
#[derive(Debug, Clone)]
pub struct RenewalCycle {
    pub credential: Credential,
    pub next_interval: Duration,
}

/// Fetch -> persist -> schedule -> wait, until something fails.
pub struct RenewalLoop<S, C: Clock = SystemClock> {
    source: S,
    file: CredentialFile,
    scheduler: RenewalScheduler<C>,
    readiness: ReadinessFlag,
    state: RenewalState,
    completed_cycles: u64,
}

impl<S: CredentialSource, C: Clock> RenewalLoop<S, C> {
    pub fn new(
        source: S,
        file: CredentialFile,
        scheduler: RenewalScheduler<C>,
        readiness: ReadinessFlag,
    ) -> Self {
        Self {
            source,
            file,
            scheduler,
            readiness,
            state: RenewalState::Initializing,
            completed_cycles: 0,
        }
    }

    pub fn state(&self) -> RenewalState {
        self.state
    }

    /// Number of successful fetch + persist cycles so far.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Time left on `credential` by the scheduler's clock.
    pub fn time_remaining(&self, credential: &Credential) -> Duration {
        self.scheduler.remaining(credential)
    }

    /// Run one `Renewing` step.
    ///
    /// On failure the loop is left in `Terminating` and must not be reused.
    pub async fn renew_once(&mut self) -> Result<RenewalCycle, RenewalError> {
        self.transition(RenewalState::Renewing);

        match self.renew().await {
            Ok(cycle) => Ok(cycle),
            Err(e) => {
                self.transition(RenewalState::Terminating);
                Err(e)
            }
        }
    }

    /// Renew until a cycle fails, then return that failure.
    ///
    /// Only returns on failure; callers hand the error to escalation.
    pub async fn run(&mut self) -> RenewalError {
        info!(
            file = %self.file.path().display(),
            override_interval = ?self.scheduler.override_interval(),
            "Starting credential renewal loop"
        );

        loop {
            match self.renew_once().await {
                Ok(cycle) => {
                    self.transition(RenewalState::Waiting);
                    info!(
                        subject = %cycle.credential.subject(),
                        expiry = %cycle.credential.expiry(),
                        next_refresh_secs = cycle.next_interval.as_secs_f64(),
                        "Credential will be refreshed in {}",
                        humantime::format_duration(cycle.next_interval)
                    );
                    tokio::time::sleep(cycle.next_interval).await;
                }
                Err(e) => {
                    // Reported once, by whoever handles the returned error
                    debug!(
                        phase = %e.phase(),
                        completed_cycles = self.completed_cycles,
                        "Renewal loop stopped"
                    );
                    return e;
                }
            }
        }
    }

    async fn renew(&mut self) -> Result<RenewalCycle, RenewalError> {
        let credential = self.source.fetch().await?;
        self.file.write(&credential)?;

        // Only after the write: ready implies a credential is on disk
        self.readiness.mark_ready();
        self.completed_cycles += 1;

        let next_interval = self.scheduler.next_interval(&credential);
        Ok(RenewalCycle {
            credential,
            next_interval,
        })
    }

    fn transition(&mut self, next: RenewalState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Renewal state transition");
            self.state = next;
        }
    }
}

impl<S, C: Clock> std::fmt::Debug for RenewalLoop<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalLoop")
            .field("file", &self.file.path())
            .field("state", &self.state)
            .field("completed_cycles", &self.completed_cycles)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    /// Credential expiring `lifetime_secs` after [`epoch`].
    pub fn credential(token: &str, lifetime_secs: i64) -> Credential {
        Credential::new(
            token,
            "vault",
            "spiffe://example.org/api",
            epoch() + chrono::Duration::seconds(lifetime_secs),
        )
    }

    pub fn assert_elapsed(started: tokio::time::Instant, secs: u64) {
        let elapsed = started.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(100),
            "expected ~{expected:?}, got {elapsed:?}"
        );
    }

    /// Replays scripted results and records what the file held at each fetch.
    #[derive(Clone)]
    pub struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Result<Credential, RenewalError>>>>,
        file_at_fetch: Arc<Mutex<Vec<Option<String>>>>,
        path: PathBuf,
        pub hang_when_empty: Arc<Notify>,
    }

    impl ScriptedSource {
        pub fn new(path: PathBuf, script: Vec<Result<Credential, RenewalError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                file_at_fetch: Arc::new(Mutex::new(Vec::new())),
                path,
                hang_when_empty: Arc::new(Notify::new()),
            }
        }

        pub fn observed(&self) -> Vec<Option<String>> {
            self.file_at_fetch.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialSource for ScriptedSource {
        async fn fetch(&self) -> Result<Credential, RenewalError> {
            self.file_at_fetch
                .lock()
                .unwrap()
                .push(std::fs::read_to_string(&self.path).ok());

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    // Simulates a slow agent: never answers
                    self.hang_when_empty.notified().await;
                    Err(RenewalError::AgentUnreachable("released".into()))
                }
            }
        }
    }
}
