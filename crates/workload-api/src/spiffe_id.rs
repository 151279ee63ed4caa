//! SPIFFE IDs and trust domains.

use std::fmt;

use crate::errors::WorkloadApiError;

const SPIFFE_SCHEME: &str = "spiffe://";

/// A SPIFFE trust domain name, e.g. `example.org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrustDomain(String);

impl TrustDomain {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed SPIFFE ID, e.g. `spiffe://example.org/ns/prod/sa/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    pub fn parse(id: &str) -> Result<Self, WorkloadApiError> {
        let invalid = || WorkloadApiError::InvalidSpiffeId(id.to_string());

        let rest = id.strip_prefix(SPIFFE_SCHEME).ok_or_else(invalid)?;
        let (td, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        if !is_valid_trust_domain(td) {
            return Err(invalid());
        }
        if !path.is_empty() && !is_valid_path(path) {
            return Err(invalid());
        }

        Ok(Self {
            trust_domain: TrustDomain(td.to_string()),
            path: path.to_string(),
        })
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", SPIFFE_SCHEME, self.trust_domain, self.path)
    }
}

/// Accept either `example.org` or `spiffe://example.org`.
pub fn normalize_trust_domain(input: &str) -> Result<TrustDomain, WorkloadApiError> {
    let td = input.strip_prefix(SPIFFE_SCHEME).unwrap_or(input);
    if !is_valid_trust_domain(td) {
        return Err(WorkloadApiError::InvalidBundle {
            trust_domain: input.to_string(),
            reason: "invalid trust domain name".to_string(),
        });
    }
    Ok(TrustDomain(td.to_string()))
}

fn is_valid_trust_domain(td: &str) -> bool {
    !td.is_empty()
        && td
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'))
}

fn is_valid_path(path: &str) -> bool {
    path.split('/').skip(1).all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
    })
}
