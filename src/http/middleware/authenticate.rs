//! Authentication stage.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::reject;
use crate::http::server::GatewayState;
use crate::security::headers::inject_identity_headers;

/// Verifies the bearer token and forwards the identity as trusted headers.
pub async fn authenticate(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match state.authenticator.authenticate(request.headers(), &path) {
        Ok(Some(identity)) => {
            tracing::debug!(user = %identity.id, role = %identity.role, "Authenticated");
            inject_identity_headers(request.headers_mut(), &identity);
            request.extensions_mut().insert(identity);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(path = %path, code = e.code(), "Authentication failed");
            return reject("authenticate", e);
        }
    }
    next.run(request).await
}
