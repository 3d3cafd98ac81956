//! Gateway request routing
//!
//! Every `/<service>` request is forwarded synchronously to the elected
//! leader and the leader's answer is mirrored to the caller. Once the leader
//! has answered, the same request is replayed to every other alive replica
//! without waiting for or reporting the outcome. Read-after-write is only
//! guaranteed against the leader; followers may lag or miss updates.

use crate::election::LeaderElector;
use crate::membership::MembershipTracker;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use groupcast_core::types::PeerAddress;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Gateway errors surfaced to the caller
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no leader elected")]
    NoLeader,
    #[error("forward to leader {leader} failed: {source}")]
    Forward {
        leader: PeerAddress,
        source: reqwest::Error,
    },
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        warn!("Request failed: {}", self);
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Headers that describe a single hop and must not be copied across
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let mut copied = headers.clone();
    for name in HOP_BY_HOP.iter() {
        copied.remove(name);
    }
    copied.remove("keep-alive");
    copied.remove("proxy-connection");
    copied
}

/// A client request captured for forwarding and replay
#[derive(Debug, Clone)]
struct Outbound {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Shared state of the routing handlers
#[derive(Clone)]
pub struct GatewayState {
    membership: Arc<MembershipTracker>,
    elector: Arc<LeaderElector>,
    client: reqwest::Client,
    forward_timeout: Duration,
    replication_timeout: Duration,
}

impl GatewayState {
    pub fn new(
        membership: Arc<MembershipTracker>,
        elector: Arc<LeaderElector>,
        forward_timeout: Duration,
        replication_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            elector,
            client: reqwest::Client::new(),
            forward_timeout,
            replication_timeout,
        }
    }

    async fn send(
        &self,
        target: PeerAddress,
        request: &Outbound,
        limit: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", target.service_url(), request.path_and_query);
        self.client
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
            .body(request.body.clone())
            .timeout(limit)
            .send()
            .await
    }

    /// Fire-and-forget replay to every alive replica except the leader
    fn replicate(&self, leader: PeerAddress, request: Outbound) {
        let followers: Vec<PeerAddress> = self
            .membership
            .snapshot()
            .into_iter()
            .filter(|peer| *peer != leader)
            .collect();

        for follower in followers {
            let state = self.clone();
            let request = request.clone();
            tokio::spawn(async move {
                match state.send(follower, &request, state.replication_timeout).await {
                    Ok(response) => debug!(
                        "Replicated {} {} to {}: {}",
                        request.method,
                        request.path_and_query,
                        follower,
                        response.status()
                    ),
                    Err(e) => debug!("Replication to {} dropped: {}", follower, e),
                }
            });
        }
    }
}

/// Build the gateway's HTTP router
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/{service}", any(forward))
        .with_state(state)
}

async fn forward(
    State(state): State<GatewayState>,
    Path(service): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let leader = state.elector.leader().ok_or(GatewayError::NoLeader)?;

    let path_and_query = match uri.query() {
        Some(query) => format!("/{}?{}", service, query),
        None => format!("/{}", service),
    };
    let request = Outbound {
        method,
        path_and_query,
        headers: end_to_end(&headers),
        body,
    };

    let upstream = state
        .send(leader, &request, state.forward_timeout)
        .await
        .map_err(|source| GatewayError::Forward { leader, source })?;

    let status = upstream.status();
    let upstream_headers = end_to_end(upstream.headers());
    let payload = upstream
        .bytes()
        .await
        .map_err(|source| GatewayError::Forward { leader, source })?;

    debug!(
        "{} {} -> leader {}: {}",
        request.method, request.path_and_query, leader, status
    );
    state.replicate(leader, request);

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    response.headers_mut().extend(upstream_headers);
    Ok(response)
}
