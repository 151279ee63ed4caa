//! JWT-SVID parsing and validation.
//!
//! A token handed out by the agent is only trusted after its signature is
//! checked against the trust domain's JWT bundle and its claims are checked
//! against the audience the caller asked for.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use crate::bundle::JwtBundleSet;
use crate::errors::WorkloadApiError;
use crate::spiffe_id::SpiffeId;

/// Signature algorithms permitted for JWT-SVIDs.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
    One(String),
    Many(Vec<String>),
}

impl AudienceClaim {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(aud) => vec![aud],
            Self::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SvidClaims {
    sub: String,
    aud: AudienceClaim,
    exp: i64,
}

/// A validated JWT-SVID.
#[derive(Clone)]
pub struct JwtSvid {
    token: String,
    spiffe_id: SpiffeId,
    audience: Vec<String>,
    expiry: DateTime<Utc>,
    hint: String,
}

impl JwtSvid {
    /// Verify `token` against `bundles` and require `audience` in its `aud`
    /// claim. `reported_id` is the SPIFFE ID the agent says it issued; the
    /// token's `sub` must match it.
    pub fn parse_and_validate(
        token: &str,
        reported_id: &str,
        hint: &str,
        bundles: &JwtBundleSet,
        audience: &str,
    ) -> Result<Self, WorkloadApiError> {
        let spiffe_id = SpiffeId::parse(reported_id)?;

        let header = decode_header(token).map_err(|e| WorkloadApiError::InvalidToken(e.to_string()))?;
        let key_id = header
            .kid
            .ok_or_else(|| WorkloadApiError::InvalidToken("missing kid header".to_string()))?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(WorkloadApiError::InvalidToken(format!(
                "unsupported algorithm: {:?}",
                header.alg
            )));
        }

        let jwk = bundles.find_key(spiffe_id.trust_domain(), &key_id)?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| WorkloadApiError::InvalidToken(format!("invalid bundle key '{key_id}': {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);

        let claims = decode::<SvidClaims>(token, &key, &validation)
            .map_err(|e| WorkloadApiError::InvalidToken(e.to_string()))?
            .claims;

        if claims.sub != spiffe_id.to_string() {
            return Err(WorkloadApiError::InvalidToken(format!(
                "subject '{}' does not match issued SPIFFE ID '{}'",
                claims.sub, spiffe_id
            )));
        }

        let expiry = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| WorkloadApiError::InvalidToken(format!("exp out of range: {}", claims.exp)))?;

        debug!(
            spiffe_id = %spiffe_id,
            key_id = %key_id,
            expiry = %expiry,
            "JWT-SVID signature and claims verified"
        );

        Ok(Self {
            token: token.to_string(),
            spiffe_id,
            audience: claims.aud.into_vec(),
            expiry,
            hint: hint.to_string(),
        })
    }

    /// The token in JWS compact serialization, exactly as issued.
    pub fn marshal(&self) -> &str {
        &self.token
    }

    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl fmt::Debug for JwtSvid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSvid")
            .field("token", &"<redacted>")
            .field("spiffe_id", &self.spiffe_id)
            .field("audience", &self.audience)
            .field("expiry", &self.expiry)
            .field("hint", &self.hint)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    const ID: &str = "spiffe://example.org/ns/prod/sa/api";

    fn claims(aud: serde_json::Value, exp: i64) -> serde_json::Value {
        json!({ "sub": ID, "aud": aud, "exp": exp, "iat": Utc::now().timestamp() })
    }

    fn in_one_hour() -> i64 {
        (Utc::now() + chrono::Duration::hours(1)).timestamp()
    }

    #[test]
    fn test_valid_svid() {
        let exp = in_one_hour();
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!("vault"), exp));

        let svid = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault").unwrap();
        assert_eq!(svid.marshal(), token);
        assert_eq!(svid.spiffe_id().to_string(), ID);
        assert_eq!(svid.expiry().timestamp(), exp);
        assert_eq!(svid.audience(), ["vault".to_string()]);
    }

    #[test]
    fn test_audience_array() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!(["db", "vault"]), in_one_hour()));
        let svid = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault").unwrap();
        assert_eq!(svid.audience().len(), 2);
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!("db"), in_one_hour()));
        let result = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault");
        assert!(matches!(result, Err(WorkloadApiError::InvalidToken(_))));
    }

    #[test]
    fn test_untrusted_signature_rejected() {
        // Signed by a different key that claims the trusted kid
        let token = sign(UNTRUSTED_KEY_PEM, "key-1", &claims(json!("vault"), in_one_hour()));
        let result = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault");
        assert!(matches!(result, Err(WorkloadApiError::InvalidToken(_))));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let token = sign(TRUSTED_KEY_PEM, "key-9", &claims(json!("vault"), in_one_hour()));
        let result = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault");
        assert!(matches!(result, Err(WorkloadApiError::UnknownKey { .. })));
    }

    #[test]
    fn test_expired_rejected() {
        let exp = (Utc::now() - chrono::Duration::hours(1)).timestamp();
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!("vault"), exp));
        let result = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault");
        assert!(matches!(result, Err(WorkloadApiError::InvalidToken(_))));
    }

    #[test]
    fn test_subject_mismatch_rejected() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!("vault"), in_one_hour()));
        let result = JwtSvid::parse_and_validate(
            &token,
            "spiffe://example.org/ns/prod/sa/other",
            "",
            &bundles(),
            "vault",
        );
        assert!(matches!(result, Err(WorkloadApiError::InvalidToken(_))));
    }

    #[test]
    fn test_foreign_trust_domain_rejected() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &json!({
            "sub": "spiffe://other.org/api",
            "aud": "vault",
            "exp": in_one_hour(),
        }));
        let result =
            JwtSvid::parse_and_validate(&token, "spiffe://other.org/api", "", &bundles(), "vault");
        assert!(matches!(result, Err(WorkloadApiError::UnknownTrustDomain(_))));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &claims(json!("vault"), in_one_hour()));
        let svid = JwtSvid::parse_and_validate(&token, ID, "", &bundles(), "vault").unwrap();
        let rendered = format!("{svid:?}");
        assert!(!rendered.contains(&token));
        assert!(rendered.contains("<redacted>"));
    }
}
