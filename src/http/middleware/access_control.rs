//! Access control stage.
//! Enforces the matched route's policy and audits the decision.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::reject;
use crate::http::server::GatewayState;
use crate::routing::RouteMatch;
use crate::security::headers::ClientAddr;
use crate::security::identity::Identity;
use crate::security::payload::RequestPayload;
use crate::security::rbac::AccessRequest;

pub async fn access_control(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    if state.authenticator.is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let decision = {
        let extensions = request.extensions();
        let route = extensions.get::<RouteMatch>().cloned().unwrap_or_else(RouteMatch::unmatched);
        let access = AccessRequest {
            method: request.method(),
            path: request.uri().path(),
            params: &route.params,
            payload: extensions.get::<RequestPayload>(),
            headers: request.headers(),
            client_address: extensions.get::<ClientAddr>().map_or("unknown", ClientAddr::as_str),
        };
        state
            .access
            .authorize(extensions.get::<Identity>(), &route.policy(), &access)
    };
    if let Err(e) = decision {
        return reject("access_control", e);
    }
    next.run(request).await
}
