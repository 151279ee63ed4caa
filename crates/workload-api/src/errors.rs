//! Workload API error types.

use std::time::Duration;
use thiserror::Error;

/// gRPC status code reported by the agent.
pub use tonic::Code as StatusCode;

/// Workload API errors
#[derive(Error, Debug)]
pub enum WorkloadApiError {
    #[error("Invalid agent address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Agent returned {code:?}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("Agent returned no JWT-SVID for the requested audience")]
    NoSvid,

    #[error("Agent returned no JWT bundles")]
    NoBundles,

    #[error("Invalid JWT bundle for trust domain '{trust_domain}': {reason}")]
    InvalidBundle { trust_domain: String, reason: String },

    #[error("No JWT bundle for trust domain '{0}'")]
    UnknownTrustDomain(String),

    #[error("No key '{key_id}' in bundle for trust domain '{trust_domain}'")]
    UnknownKey { trust_domain: String, key_id: String },

    #[error("Invalid SPIFFE ID '{0}'")]
    InvalidSpiffeId(String),

    #[error("Invalid JWT-SVID: {0}")]
    InvalidToken(String),
}

impl WorkloadApiError {
    /// Whether the agent could not be reached at all (as opposed to reaching
    /// it and getting a rejection or an unverifiable token).
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => matches!(
                code,
                StatusCode::Unavailable | StatusCode::DeadlineExceeded | StatusCode::Cancelled
            ),
            _ => false,
        }
    }

    /// Whether the failure came from local verification of the returned token.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidBundle { .. }
                | Self::UnknownTrustDomain(_)
                | Self::UnknownKey { .. }
                | Self::InvalidSpiffeId(_)
                | Self::InvalidToken(_)
        )
    }
}

impl From<tonic::Status> for WorkloadApiError {
    fn from(status: tonic::Status) -> Self {
        Self::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}
