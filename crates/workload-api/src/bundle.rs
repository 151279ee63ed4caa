//! JWT bundles (per-trust-domain JWKS documents) served by the agent.

use std::collections::HashMap;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tracing::{debug, trace};

use crate::errors::WorkloadApiError;
use crate::proto::JwtBundlesResponse;
use crate::spiffe_id::{normalize_trust_domain, TrustDomain};

/// JWT signing keys for every trust domain the agent knows about.
#[derive(Debug, Clone, Default)]
pub struct JwtBundleSet {
    bundles: HashMap<String, JwkSet>,
}

impl JwtBundleSet {
    /// Parse the raw JWKS documents from a `FetchJWTBundles` message.
    ///
    /// Keys may be bare trust domain names or `spiffe://` trust domain IDs.
    /// A malformed document fails the whole set.
    pub fn from_response(response: JwtBundlesResponse) -> Result<Self, WorkloadApiError> {
        if response.bundles.is_empty() {
            return Err(WorkloadApiError::NoBundles);
        }

        let mut bundles = HashMap::with_capacity(response.bundles.len());
        for (key, raw) in response.bundles {
            let trust_domain = normalize_trust_domain(&key)?;
            let jwks: JwkSet =
                serde_json::from_slice(&raw).map_err(|e| WorkloadApiError::InvalidBundle {
                    trust_domain: trust_domain.to_string(),
                    reason: e.to_string(),
                })?;

            trace!(
                trust_domain = %trust_domain,
                key_count = jwks.keys.len(),
                "Parsed JWT bundle"
            );
            bundles.insert(trust_domain.as_str().to_string(), jwks);
        }

        debug!(trust_domains = bundles.len(), "Loaded JWT bundles");
        Ok(Self { bundles })
    }

    /// Number of trust domains with a bundle.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Look up a signing key by trust domain and key ID.
    pub fn find_key(&self, trust_domain: &TrustDomain, key_id: &str) -> Result<&Jwk, WorkloadApiError> {
        let jwks = self
            .bundles
            .get(trust_domain.as_str())
            .ok_or_else(|| WorkloadApiError::UnknownTrustDomain(trust_domain.to_string()))?;

        jwks.keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(key_id))
            .ok_or_else(|| WorkloadApiError::UnknownKey {
                trust_domain: trust_domain.to_string(),
                key_id: key_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWKS: &str = r#"{
        "keys": [{
            "use": "jwt-svid",
            "kty": "EC",
            "kid": "key-1",
            "crv": "P-256",
            "x": "3NZiBw9EWcpLV7qo-YIREQe0gFksWUCIhaJNaovXMqE",
            "y": "yqHf-gYSdYvBXfbvZQNAOlBW9pntDNhZYdKZ6XmzXX4"
        }],
        "spiffe_refresh_hint": 300
    }"#;

    fn response(entries: &[(&str, &str)]) -> JwtBundlesResponse {
        JwtBundlesResponse {
            bundles: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    #[test]
    fn test_parses_spire_jwks() {
        let set = JwtBundleSet::from_response(response(&[("spiffe://example.org", JWKS)])).unwrap();
        assert_eq!(set.len(), 1);

        let td = normalize_trust_domain("example.org").unwrap();
        assert!(set.find_key(&td, "key-1").is_ok());
    }

    #[test]
    fn test_unknown_key_and_domain() {
        let set = JwtBundleSet::from_response(response(&[("example.org", JWKS)])).unwrap();

        let td = normalize_trust_domain("example.org").unwrap();
        assert!(matches!(
            set.find_key(&td, "key-2"),
            Err(WorkloadApiError::UnknownKey { .. })
        ));

        let other = normalize_trust_domain("other.org").unwrap();
        assert!(matches!(
            set.find_key(&other, "key-1"),
            Err(WorkloadApiError::UnknownTrustDomain(_))
        ));
    }

    #[test]
    fn test_malformed_bundle_fails_set() {
        let result = JwtBundleSet::from_response(response(&[
            ("example.org", JWKS),
            ("broken.org", "not json"),
        ]));
        assert!(matches!(result, Err(WorkloadApiError::InvalidBundle { .. })));
    }

    #[test]
    fn test_empty_response() {
        let result = JwtBundleSet::from_response(JwtBundlesResponse::default());
        assert!(matches!(result, Err(WorkloadApiError::NoBundles)));
    }
}
