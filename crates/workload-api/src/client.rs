//! Workload API client over a Unix domain socket.

use std::time::Duration;

use http::uri::PathAndQuery;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::codec::ProstCodec;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info, trace};

use crate::address::AgentAddress;
use crate::bundle::JwtBundleSet;
use crate::errors::WorkloadApiError;
use crate::proto::{
    JwtBundlesRequest, JwtBundlesResponse, JwtSvidRequest, JwtSvidResponse, FETCH_JWT_BUNDLES,
    FETCH_JWT_SVID, SECURITY_HEADER,
};
use crate::svid::JwtSvid;

/// Placeholder authority; the connector ignores it and dials the socket.
const CHANNEL_AUTHORITY: &str = "http://localhost";

/// Client for the SPIFFE Workload API.
///
/// One client holds one gRPC channel to the agent. Callers that want a fresh
/// connection per fetch construct a new client each time.
pub struct WorkloadApiClient {
    address: AgentAddress,
    grpc: tonic::client::Grpc<Channel>,
}

impl WorkloadApiClient {
    /// Connect to the agent listening at `address`.
    pub async fn connect(address: AgentAddress) -> Result<Self, WorkloadApiError> {
        let socket_path = address.socket_path().to_path_buf();

        let channel = Endpoint::try_from(CHANNEL_AUTHORITY)
            .map_err(|e| WorkloadApiError::ConnectionFailed(e.to_string()))?
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket_path = socket_path.clone();
                async move {
                    let stream = UnixStream::connect(socket_path).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }))
            .await
            .map_err(|e| WorkloadApiError::ConnectionFailed(format!("{address}: {e}")))?;

        debug!(address = %address, "Connected to Workload API");

        Ok(Self {
            address,
            grpc: tonic::client::Grpc::new(channel),
        })
    }

    /// Agent address this client is connected to.
    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    /// Fetch the current JWT bundles (first message of the bundle stream).
    pub async fn fetch_jwt_bundles(&mut self) -> Result<JwtBundleSet, WorkloadApiError> {
        self.ready().await?;

        let codec: ProstCodec<JwtBundlesRequest, JwtBundlesResponse> = ProstCodec::default();
        let response = self
            .grpc
            .server_streaming(
                secured(JwtBundlesRequest {}),
                PathAndQuery::from_static(FETCH_JWT_BUNDLES),
                codec,
            )
            .await?;

        let first = response
            .into_inner()
            .message()
            .await?
            .ok_or(WorkloadApiError::NoBundles)?;

        trace!(trust_domains = first.bundles.len(), "Received JWT bundles");
        JwtBundleSet::from_response(first)
    }

    /// Fetch a JWT-SVID for `audience` without validating it.
    ///
    /// Returns `(spiffe_id, token, hint)` of the first SVID the agent issued.
    pub async fn fetch_raw_jwt_svid(
        &mut self,
        audience: &str,
    ) -> Result<(String, String, String), WorkloadApiError> {
        self.ready().await?;

        let codec: ProstCodec<JwtSvidRequest, JwtSvidResponse> = ProstCodec::default();
        let request = JwtSvidRequest {
            audience: vec![audience.to_string()],
            spiffe_id: String::new(),
        };
        let response = self
            .grpc
            .unary(secured(request), PathAndQuery::from_static(FETCH_JWT_SVID), codec)
            .await?
            .into_inner();

        let svid = response
            .svids
            .into_iter()
            .next()
            .ok_or(WorkloadApiError::NoSvid)?;

        trace!(spiffe_id = %svid.spiffe_id, "Received JWT-SVID");
        Ok((svid.spiffe_id, svid.svid, svid.hint))
    }

    /// Fetch a JWT-SVID for `audience` and validate it against the agent's
    /// current JWT bundles. Never returns an unvalidated token.
    pub async fn fetch_jwt_svid(&mut self, audience: &str) -> Result<JwtSvid, WorkloadApiError> {
        let bundles = self.fetch_jwt_bundles().await?;
        let (spiffe_id, token, hint) = self.fetch_raw_jwt_svid(audience).await?;
        let svid = JwtSvid::parse_and_validate(&token, &spiffe_id, &hint, &bundles, audience)?;

        info!(
            spiffe_id = %svid.spiffe_id(),
            audience = %audience,
            expiry = %svid.expiry(),
            "JWT-SVID fetched and validated"
        );
        Ok(svid)
    }

    async fn ready(&mut self) -> Result<(), WorkloadApiError> {
        self.grpc
            .ready()
            .await
            .map_err(|e| WorkloadApiError::ConnectionFailed(format!("agent not ready: {e}")))
    }
}

/// Connect, fetch and validate one JWT-SVID, all under one deadline.
pub async fn fetch_jwt_svid_with_timeout(
    address: &AgentAddress,
    audience: &str,
    timeout: Duration,
) -> Result<JwtSvid, WorkloadApiError> {
    tokio::time::timeout(timeout, async {
        let mut client = WorkloadApiClient::connect(address.clone()).await?;
        client.fetch_jwt_svid(audience).await
    })
    .await
    .map_err(|_| WorkloadApiError::Timeout(timeout))?
}

fn secured<T>(message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request
        .metadata_mut()
        .insert(SECURITY_HEADER, MetadataValue::from_static("true"));
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_carry_security_header() {
        let request = secured(JwtBundlesRequest {});
        assert_eq!(
            request.metadata().get(SECURITY_HEADER).and_then(|v| v.to_str().ok()),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket_fails() {
        let address = AgentAddress::parse("/nonexistent/svidcar-test/agent.sock").unwrap();
        let result = WorkloadApiClient::connect(address).await;
        match result {
            Err(err) => assert!(err.is_unreachable()),
            Ok(_) => panic!("connect to a missing socket must fail"),
        }
    }

    #[tokio::test]
    async fn test_fetch_times_out_as_unreachable() {
        let address = AgentAddress::parse("/nonexistent/svidcar-test/agent.sock").unwrap();
        let err = fetch_jwt_svid_with_timeout(&address, "vault", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_fetch_from_agent_returns_validated_svid() {
        let exp = in_one_hour();
        let token = sign(TRUSTED_KEY_PEM, "key-1", &svid_claims("vault", exp));
        let (_dir, address) = spawn_agent(FakeAgent::new(&token)).await;

        let svid = fetch_jwt_svid_with_timeout(&address, "vault", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(svid.marshal(), token);
        assert_eq!(svid.spiffe_id().to_string(), AGENT_ID);
        assert_eq!(svid.expiry().timestamp(), exp);
        assert_eq!(svid.hint(), "internal");
    }

    #[tokio::test]
    async fn test_agent_token_with_untrusted_signature_is_rejected() {
        let token = sign(UNTRUSTED_KEY_PEM, "key-1", &svid_claims("vault", in_one_hour()));
        let (_dir, address) = spawn_agent(FakeAgent::new(&token)).await;

        let err = fetch_jwt_svid_with_timeout(&address, "vault", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_agent_status_is_surfaced() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &svid_claims("vault", in_one_hour()));
        let (_dir, address) = spawn_agent(FakeAgent::new(&token)).await;

        // The agent only issues for "vault"
        let err = fetch_jwt_svid_with_timeout(&address, "db", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            WorkloadApiError::Status { code, .. } => {
                assert_eq!(code, crate::errors::StatusCode::PermissionDenied)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_client_reuses_channel_for_both_calls() {
        let token = sign(TRUSTED_KEY_PEM, "key-1", &svid_claims("vault", in_one_hour()));
        let (_dir, address) = spawn_agent(FakeAgent::new(&token)).await;

        let mut client = WorkloadApiClient::connect(address.clone()).await.unwrap();
        assert_eq!(client.address(), &address);

        let bundles = client.fetch_jwt_bundles().await.unwrap();
        assert_eq!(bundles.len(), 1);

        let (spiffe_id, raw, hint) = client.fetch_raw_jwt_svid("vault").await.unwrap();
        assert_eq!(spiffe_id, AGENT_ID);
        assert_eq!(raw, token);
        assert_eq!(hint, "internal");
    }

    // ------------------------------------------------------------------------
    // In-process Workload API agent on a Unix socket
    // ------------------------------------------------------------------------

    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;
    use tokio_stream::Stream;
    use tonic::body::BoxBody;
    use tonic::server::{Grpc, NamedService, ServerStreamingService, UnaryService};
    use tonic::{Response, Status};

    use crate::proto::JwtSvid as IssuedSvid;
    use crate::svid::test_support::{sign, TRUSTED_JWKS, TRUSTED_KEY_PEM, UNTRUSTED_KEY_PEM};

    const AGENT_ID: &str = "spiffe://example.org/ns/prod/sa/api";

    type ServiceFuture<T> = Pin<Box<dyn Future<Output = Result<T, Status>> + Send>>;
    type BundleStream = Pin<Box<dyn Stream<Item = Result<JwtBundlesResponse, Status>> + Send>>;

    fn in_one_hour() -> i64 {
        (Utc::now() + chrono::Duration::hours(1)).timestamp()
    }

    fn svid_claims(aud: &str, exp: i64) -> serde_json::Value {
        json!({ "sub": AGENT_ID, "aud": [aud], "exp": exp })
    }

    fn require_security_header<T>(request: &tonic::Request<T>) -> Result<(), Status> {
        match request.metadata().get(SECURITY_HEADER).and_then(|v| v.to_str().ok()) {
            Some("true") => Ok(()),
            _ => Err(Status::invalid_argument("security header missing from request")),
        }
    }

    #[derive(Clone)]
    struct FakeAgent {
        token: String,
        bundles: HashMap<String, Vec<u8>>,
    }

    impl FakeAgent {
        fn new(token: &str) -> Self {
            let bundles = HashMap::from([(
                "spiffe://example.org".to_string(),
                TRUSTED_JWKS.as_bytes().to_vec(),
            )]);
            Self {
                token: token.to_string(),
                bundles,
            }
        }
    }

    impl NamedService for FakeAgent {
        const NAME: &'static str = "SpiffeWorkloadAPI";
    }

    struct FetchSvid(FakeAgent);

    impl UnaryService<JwtSvidRequest> for FetchSvid {
        type Response = JwtSvidResponse;
        type Future = ServiceFuture<Response<JwtSvidResponse>>;

        fn call(&mut self, request: tonic::Request<JwtSvidRequest>) -> Self::Future {
            let agent = self.0.clone();
            Box::pin(async move {
                require_security_header(&request)?;
                if request.get_ref().audience != ["vault".to_string()] {
                    return Err(Status::permission_denied("audience not authorized"));
                }
                Ok(Response::new(JwtSvidResponse {
                    svids: vec![IssuedSvid {
                        spiffe_id: AGENT_ID.to_string(),
                        svid: agent.token,
                        hint: "internal".to_string(),
                    }],
                }))
            })
        }
    }

    struct FetchBundles(FakeAgent);

    impl ServerStreamingService<JwtBundlesRequest> for FetchBundles {
        type Response = JwtBundlesResponse;
        type ResponseStream = BundleStream;
        type Future = ServiceFuture<Response<BundleStream>>;

        fn call(&mut self, request: tonic::Request<JwtBundlesRequest>) -> Self::Future {
            let bundles = self.0.bundles.clone();
            Box::pin(async move {
                require_security_header(&request)?;
                let stream: BundleStream =
                    Box::pin(tokio_stream::iter(vec![Ok(JwtBundlesResponse { bundles })]));
                Ok(Response::new(stream))
            })
        }
    }

    impl tower::Service<http::Request<BoxBody>> for FakeAgent {
        type Response = http::Response<BoxBody>;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: http::Request<BoxBody>) -> Self::Future {
            let agent = self.clone();
            Box::pin(async move {
                let response = match request.uri().path() {
                    FETCH_JWT_SVID => {
                        let mut grpc =
                            Grpc::new(ProstCodec::<JwtSvidResponse, JwtSvidRequest>::default());
                        grpc.unary(FetchSvid(agent), request).await
                    }
                    FETCH_JWT_BUNDLES => {
                        let mut grpc = Grpc::new(
                            ProstCodec::<JwtBundlesResponse, JwtBundlesRequest>::default(),
                        );
                        grpc.server_streaming(FetchBundles(agent), request).await
                    }
                    _ => http::Response::builder()
                        .header("grpc-status", (tonic::Code::Unimplemented as i32).to_string())
                        .header("content-type", "application/grpc")
                        .body(tonic::body::empty_body())
                        .unwrap(),
                };
                Ok(response)
            })
        }
    }

    async fn spawn_agent(agent: FakeAgent) -> (TempDir, AgentAddress) {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(agent)
                .serve_with_incoming(UnixListenerStream::new(listener)),
        );

        let address = AgentAddress::parse(socket.to_str().unwrap()).unwrap();
        (dir, address)
    }
}
