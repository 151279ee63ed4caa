//! Workload API message types.
//!
//! Hand-maintained prost definitions for the subset of `workload.proto`
//! used by svidcar. Field tags match the upstream SPIFFE definitions.

use std::collections::HashMap;

/// Full method path for `FetchJWTSVID`.
pub const FETCH_JWT_SVID: &str = "/SpiffeWorkloadAPI/FetchJWTSVID";

/// Full method path for `FetchJWTBundles`.
pub const FETCH_JWT_BUNDLES: &str = "/SpiffeWorkloadAPI/FetchJWTBundles";

/// Metadata key the agent requires on every call.
pub const SECURITY_HEADER: &str = "workload.spiffe.io";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtSvidRequest {
    /// Required. The audience(s) the workload intends to authenticate against.
    #[prost(string, repeated, tag = "1")]
    pub audience: Vec<String>,
    /// Optional. Empty asks for all identities the workload is entitled to.
    #[prost(string, tag = "2")]
    pub spiffe_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtSvid {
    #[prost(string, tag = "1")]
    pub spiffe_id: String,
    /// Encoded JWT using JWS Compact Serialization.
    #[prost(string, tag = "2")]
    pub svid: String,
    #[prost(string, tag = "3")]
    pub hint: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtSvidResponse {
    #[prost(message, repeated, tag = "1")]
    pub svids: Vec<JwtSvid>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtBundlesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JwtBundlesResponse {
    /// JWKS documents keyed by trust domain.
    #[prost(map = "string, bytes", tag = "1")]
    pub bundles: HashMap<String, Vec<u8>>,
}
