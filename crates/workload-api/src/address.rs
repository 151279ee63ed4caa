//! Agent socket address parsing.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::WorkloadApiError;

const UNIX_SCHEME: &str = "unix://";

/// Address of a SPIFFE agent's Workload API endpoint.
///
/// Accepts either a `unix://` URI or a bare absolute socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAddress {
    socket_path: PathBuf,
}

impl AgentAddress {
    /// Parse an agent address.
    pub fn parse(address: &str) -> Result<Self, WorkloadApiError> {
        let address = address.trim();
        let invalid = |reason: &str| WorkloadApiError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let path = match address.strip_prefix(UNIX_SCHEME) {
            Some(path) => path,
            None if address.contains("://") => {
                return Err(invalid("only unix:// addresses are supported"))
            }
            None => address,
        };

        if path.is_empty() {
            return Err(invalid("socket path is empty"));
        }
        if !Path::new(path).is_absolute() {
            return Err(invalid("socket path must be absolute"));
        }

        Ok(Self {
            socket_path: PathBuf::from(path),
        })
    }

    /// Filesystem path of the agent socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", UNIX_SCHEME, self.socket_path.display())
    }
}
