//! Orchestrator client used by self-deletion escalation.
//!
//! Only one operation is needed: delete the pod this process runs in, with
//! foreground propagation so dependents are removed before the pod object.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// In-cluster service account mount.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Orchestrator client errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("in-cluster configuration unavailable: {0}")]
    Configuration(String),

    #[error("request to orchestrator failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("orchestrator rejected deletion of {unit}: HTTP {status}: {body}")]
    Rejected {
        unit: String,
        status: u16,
        body: String,
    },
}

/// The orchestrator-managed unit hosting this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub namespace: String,
    pub name: String,
}

impl ExecutionUnit {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Deletes execution units.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Request deletion of `unit` with cascading (foreground) propagation.
    async fn delete_unit(&self, unit: &ExecutionUnit) -> Result<(), OrchestratorError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOptions {
    api_version: &'static str,
    kind: &'static str,
    propagation_policy: &'static str,
}

const FOREGROUND_DELETE: DeleteOptions = DeleteOptions {
    api_version: "v1",
    kind: "DeleteOptions",
    propagation_policy: "Foreground",
};

/// Kubernetes API client for pod deletion.
#[derive(Clone)]
pub struct KubernetesClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl KubernetesClient {
    /// Client for an explicit API server and bearer token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_http(http, base_url, token))
    }

    fn with_http(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Client configured from the pod's service account and the
    /// `KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT` environment.
    pub fn in_cluster() -> Result<Self, OrchestratorError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| OrchestratorError::Configuration("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        // IPv6 service hosts need brackets in a URL
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = read_service_account_file(&sa_dir.join("token"))?;
        let ca_pem = read_service_account_file(&sa_dir.join("ca.crt"))?;
        let ca = reqwest::Certificate::from_pem(ca_pem.as_bytes())?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(ca)
            .build()?;

        let base_url = format!("https://{host}:{port}");
        debug!(api_server = %base_url, "Loaded in-cluster Kubernetes configuration");
        Ok(Self::with_http(http, base_url, token.trim()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pod_url(&self, unit: &ExecutionUnit) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.base_url, unit.namespace, unit.name
        )
    }
}

#[async_trait]
impl Orchestrator for KubernetesClient {
    async fn delete_unit(&self, unit: &ExecutionUnit) -> Result<(), OrchestratorError> {
        let url = self.pod_url(unit);
        debug!(url = %url, "Requesting pod deletion");

        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .json(&FOREGROUND_DELETE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(OrchestratorError::Rejected {
                unit: unit.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        info!(pod = %unit, status = status.as_u16(), "Pod deletion accepted");
        Ok(())
    }
}

impl fmt::Debug for KubernetesClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubernetesClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn read_service_account_file(path: &Path) -> Result<String, OrchestratorError> {
    std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Configuration(format!("{}: {e}", path.display())))
}
