//! The credential value handled by one renewal cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use svidcar_workload_api::JwtSvid;

/// A fetched, validated, audience-bound token with an absolute expiry.
///
/// Immutable once fetched; each renewal produces a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    audience: String,
    subject: String,
    expiry: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        token: impl Into<String>,
        audience: impl Into<String>,
        subject: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            audience: audience.into(),
            subject: subject.into(),
            expiry,
        }
    }

    /// Build from a validated JWT-SVID for `audience`.
    pub fn from_svid(svid: &JwtSvid, audience: &str) -> Self {
        Self::new(
            svid.marshal(),
            audience,
            svid.spiffe_id().to_string(),
            svid.expiry(),
        )
    }

    /// The serialized token. Secret: never log it.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// SPIFFE ID the credential was issued to.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("audience", &self.audience)
            .field("subject", &self.subject)
            .field("expiry", &self.expiry)
            .finish()
    }
}
