//! IP filter stage.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::reject;
use crate::http::server::GatewayState;
use crate::routing::RouteMatch;
use crate::security::headers::ClientAddr;

pub async fn ip_filter(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let mode = request
        .extensions()
        .get::<RouteMatch>()
        .map(RouteMatch::ip_mode)
        .unwrap_or_default();
    let verdict = match request.extensions().get::<ClientAddr>() {
        // Runs before authentication: only a verifiable token can grant bypass.
        Some(client) => state.ip_filter.check(client.as_str(), mode, || {
            state.authenticator.identify(request.headers())
        }),
        None => Ok(()),
    };
    if let Err(e) = verdict {
        return reject("ip_filter", e);
    }
    next.run(request).await
}
