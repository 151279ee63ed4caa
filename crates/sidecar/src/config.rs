//! Process configuration.
//!
//! Flags and environment variables are parsed by clap into [`SidecarArgs`],
//! then validated into a [`SidecarConfig`] before any component starts.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use svidcar_workload_api::{AgentAddress, WorkloadApiError};
use thiserror::Error;

use crate::escalation::EscalationStrategy;
use crate::orchestrator::ExecutionUnit;
use crate::storage::DEFAULT_FILE_MODE;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting --{flag} (env {env})")]
    Missing {
        flag: &'static str,
        env: &'static str,
    },

    #[error("invalid file mode '{value}': {reason}")]
    InvalidFileMode { value: String, reason: String },

    #[error("invalid SPIFFE agent socket: {0}")]
    InvalidAgentSocket(#[from] WorkloadApiError),

    #[error("--escalation delete-pod requires --{flag} (env {env})")]
    MissingPodIdentity {
        flag: &'static str,
        env: &'static str,
    },
}

/// Terminal action on renewal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EscalationKind {
    /// Exit non-zero and let the container restart
    #[default]
    Direct,
    /// Delete the hosting pod, then exit
    DeletePod,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// svidcar - keeps a SPIFFE JWT-SVID on disk for a co-located workload
#[derive(Parser, Debug, Clone)]
#[command(name = "svidcar")]
#[command(author, version, about, long_about = None)]
pub struct SidecarArgs {
    /// Keep renewing (true) or fetch once and exit (false)
    #[arg(
        long = "daemon-mode",
        env = "DAEMON_MODE",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub daemon_mode: bool,

    /// Port for the /started readiness endpoint
    #[arg(long = "health-port", env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Audience the JWT-SVID is requested for
    #[arg(long = "jwt-audience", env = "JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Path the JWT-SVID is written to
    #[arg(long = "jwt-file-name", env = "JWT_FILE_NAME")]
    pub jwt_file_name: Option<PathBuf>,

    /// Octal permission bits for the credential file
    #[arg(long = "jwt-file-mode", env = "JWT_FILE_MODE", default_value = "0644", value_parser = parse_file_mode)]
    pub jwt_file_mode: u32,

    /// SPIFFE Workload API socket (path or unix:// URI)
    #[arg(long = "spiffe-agent-socket", env = "SPIFFE_AGENT_SOCKET")]
    pub spiffe_agent_socket: Option<String>,

    /// Fixed renewal interval (e.g. 30s, 5m); still capped at 80% of the
    /// credential's remaining lifetime
    #[arg(
        long = "refresh-interval-override",
        env = "REFRESH_INTERVAL_OVERRIDE",
        value_parser = humantime::parse_duration
    )]
    pub refresh_interval_override: Option<Duration>,

    /// Action taken when renewal fails
    #[arg(long = "escalation", env = "ESCALATION", value_enum, default_value_t = EscalationKind::Direct)]
    pub escalation: EscalationKind,

    /// Name of the pod hosting this process
    #[arg(long = "pod-name", env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace of the pod hosting this process
    #[arg(long = "pod-namespace", env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,

    /// Log output format
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    pub verbose: bool,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub daemon_mode: bool,
    pub health_port: u16,
    pub audience: String,
    pub credential_path: PathBuf,
    pub file_mode: u32,
    pub agent_address: AgentAddress,
    pub refresh_interval_override: Option<Duration>,
    pub escalation: EscalationStrategy,
    pub log_format: LogFormat,
    pub verbose: bool,
}

impl SidecarConfig {
    /// Health endpoint listen address (all interfaces).
    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.health_port))
    }
}

impl TryFrom<SidecarArgs> for SidecarConfig {
    type Error = ConfigError;

    fn try_from(args: SidecarArgs) -> Result<Self, Self::Error> {
        let audience = non_empty(args.jwt_audience).ok_or(ConfigError::Missing {
            flag: "jwt-audience",
            env: "JWT_AUDIENCE",
        })?;

        let credential_path = args
            .jwt_file_name
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing {
                flag: "jwt-file-name",
                env: "JWT_FILE_NAME",
            })?;

        let socket = non_empty(args.spiffe_agent_socket).ok_or(ConfigError::Missing {
            flag: "spiffe-agent-socket",
            env: "SPIFFE_AGENT_SOCKET",
        })?;
        let agent_address = AgentAddress::parse(&socket)?;

        let escalation = match args.escalation {
            EscalationKind::Direct => EscalationStrategy::Direct,
            EscalationKind::DeletePod => {
                let name = non_empty(args.pod_name).ok_or(ConfigError::MissingPodIdentity {
                    flag: "pod-name",
                    env: "POD_NAME",
                })?;
                let namespace =
                    non_empty(args.pod_namespace).ok_or(ConfigError::MissingPodIdentity {
                        flag: "pod-namespace",
                        env: "POD_NAMESPACE",
                    })?;
                EscalationStrategy::DeletePod(ExecutionUnit::new(namespace, name))
            }
        };

        Ok(Self {
            daemon_mode: args.daemon_mode,
            health_port: args.health_port,
            audience,
            credential_path,
            file_mode: args.jwt_file_mode,
            agent_address,
            // Zero means "no override"
            refresh_interval_override: args.refresh_interval_override.filter(|d| !d.is_zero()),
            escalation,
            log_format: args.log_format,
            verbose: args.verbose,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse octal permission bits such as `0644`, `644` or `0o600`.
pub fn parse_file_mode(value: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidFileMode {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let digits = value.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    if digits.is_empty() {
        return Err(invalid("empty"));
    }

    let mode = u32::from_str_radix(digits, 8).map_err(|_| invalid("not an octal number"))?;
    if mode > 0o7777 {
        return Err(invalid("out of range"));
    }
    if mode & 0o400 == 0 {
        return Err(invalid("owner must be able to read the credential"));
    }
    Ok(mode)
}

impl Default for SidecarArgs {
    fn default() -> Self {
        Self {
            daemon_mode: true,
            health_port: 8080,
            jwt_audience: None,
            jwt_file_name: None,
            jwt_file_mode: DEFAULT_FILE_MODE,
            spiffe_agent_socket: None,
            refresh_interval_override: None,
            escalation: EscalationKind::Direct,
            pod_name: None,
            pod_namespace: None,
            log_format: LogFormat::Text,
            verbose: false,
        }
    }
}
