//! Credential source: where each renewal cycle gets its token from.

use std::time::Duration;

use async_trait::async_trait;
use svidcar_workload_api::{fetch_jwt_svid_with_timeout, AgentAddress};
use tracing::debug;

use crate::credential::Credential;
use crate::errors::RenewalError;

/// Bound on one connect + fetch + validate round trip to the agent.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches one validated credential per call.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Credential, RenewalError>;
}

/// SPIFFE Workload API source.
///
/// Opens a fresh connection to the agent for every fetch so a restarted
/// agent is picked up without any reconnect logic.
#[derive(Debug, Clone)]
pub struct WorkloadApiSource {
    address: AgentAddress,
    audience: String,
    timeout: Duration,
}

impl WorkloadApiSource {
    pub fn new(address: AgentAddress, audience: impl Into<String>) -> Self {
        Self {
            address,
            audience: audience.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

#[async_trait]
impl CredentialSource for WorkloadApiSource {
    async fn fetch(&self) -> Result<Credential, RenewalError> {
        debug!(
            address = %self.address,
            audience = %self.audience,
            timeout_secs = self.timeout.as_secs(),
            "Fetching JWT-SVID"
        );

        let svid = fetch_jwt_svid_with_timeout(&self.address, &self.audience, self.timeout).await?;
        Ok(Credential::from_svid(&svid, &self.audience))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_agent_is_unreachable() {
        let address = AgentAddress::parse("/nonexistent/svidcar-test/agent.sock").unwrap();
        let source = WorkloadApiSource::new(address, "vault").with_timeout(Duration::from_secs(1));

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, RenewalError::AgentUnreachable(_)));
    }
}
