//! SPIFFE Workload API client for svidcar.
//!
//! Talks to a local SPIFFE agent (e.g. SPIRE) over its Unix domain socket and
//! returns JWT-SVIDs that have been verified locally against the agent's JWT
//! bundles. The crate never hands out an unvalidated token.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use svidcar_workload_api::{fetch_jwt_svid_with_timeout, AgentAddress};
//!
//! let address = AgentAddress::parse("unix:///run/spire/sockets/agent.sock")?;
//! let svid = fetch_jwt_svid_with_timeout(&address, "vault", Duration::from_secs(10)).await?;
//! println!("{} expires at {}", svid.spiffe_id(), svid.expiry());
//! ```

pub mod address;
pub mod bundle;
pub mod client;
pub mod errors;
pub mod proto;
pub mod spiffe_id;
pub mod svid;

pub use address::AgentAddress;
pub use bundle::JwtBundleSet;
pub use client::{fetch_jwt_svid_with_timeout, WorkloadApiClient};
pub use errors::WorkloadApiError;
pub use spiffe_id::{SpiffeId, TrustDomain};
pub use svid::JwtSvid;
