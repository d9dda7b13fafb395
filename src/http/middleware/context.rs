//! Request context shared by every stage.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;

use crate::error::GatewayError;
use crate::http::middleware::reject;
use crate::http::server::GatewayState;
use crate::observability::metrics;
use crate::routing::matcher::check_request_path;
use crate::security::headers::{resolve_client_addr, strip_identity_headers};

/// Times the pipeline and counts the outcome.
pub async fn observe(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let outcome = if response.status().is_success() {
        "admitted"
    } else {
        "rejected"
    };
    metrics::record_request(outcome, start);
    response
}

/// Refuses ambiguous paths, resolves the client address, drops spoofed
/// identity headers and looks up the route rule.
pub async fn prepare(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Err(e) = check_request_path(request.uri().path()) {
        tracing::warn!(path = %request.uri().path(), reason = %e, "Request path refused");
        return reject("prepare", GatewayError::BadRequest(e.to_string()));
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = resolve_client_addr(request.headers(), peer);

    strip_identity_headers(request.headers_mut());

    let route = state.router.lookup(request.method(), request.uri().path());
    tracing::debug!(client = %client.as_str(), route = route.name(), "Admission started");

    request.extensions_mut().insert(client);
    request.extensions_mut().insert(route);
    next.run(request).await
}
