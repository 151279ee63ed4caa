//! Startup/readiness endpoint
//!
//! Serves `GET /started`: `200` once the first credential has been written,
//! `503` before that. Connections are one-shot and time-bounded so a slow
//! prober cannot hold resources.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

use crate::readiness::ReadinessFlag;

/// Probe route.
pub const STARTED_PATH: &str = "/started";

/// Time allowed for a client to send its request headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a whole connection, request and response included.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Build the response for a probe request.
pub fn respond<B>(readiness: &ReadinessFlag, request: &Request<B>) -> Response<Full<Bytes>> {
    let status = if request.uri().path() != STARTED_PATH {
        StatusCode::NOT_FOUND
    } else if request.method() != Method::GET {
        StatusCode::METHOD_NOT_ALLOWED
    } else if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// HTTP server for the readiness probe.
#[derive(Debug)]
pub struct HealthServer {
    listener: TcpListener,
    readiness: ReadinessFlag,
}

impl HealthServer {
    /// Bind the probe listener. Binding early surfaces port conflicts at
    /// startup rather than after the first renewal.
    pub async fn bind(addr: SocketAddr, readiness: ReadinessFlag) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            readiness,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and answer probes until the task is dropped.
    pub async fn serve(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(address = %addr, path = STARTED_PATH, "Starting health server"),
            Err(_) => info!(path = STARTED_PATH, "Starting health server"),
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept health connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let readiness = self.readiness.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let response = respond(&readiness, &request);
                    trace!(
                        peer = %peer,
                        method = %request.method(),
                        path = %request.uri().path(),
                        status = response.status().as_u16(),
                        "Health probe"
                    );
                    async move { Ok::<_, Infallible>(response) }
                });

                let connection = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(HEADER_READ_TIMEOUT)
                    .keep_alive(false)
                    .serve_connection(TokioIo::new(stream), service);

                match tokio::time::timeout(CONNECTION_TIMEOUT, connection).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(peer = %peer, error = %e, "Health connection error"),
                    Err(_) => debug!(peer = %peer, "Health connection timed out"),
                }
            });
        }
    }
}
