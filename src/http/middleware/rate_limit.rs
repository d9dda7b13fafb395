//! Rate limiting stages.
//!
//! The global stage runs before authentication and sees only the client
//! address. The route stage runs after access control and sees the
//! verified identity.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::reject;
use crate::http::response::{apply_rate_limit_headers, merge_rate_limit_headers};
use crate::http::server::GatewayState;
use crate::security::authenticator::bearer_token;
use crate::security::headers::ClientAddr;
use crate::security::identity::Identity;
use crate::security::rate_limit::Subject;

fn client_addr(request: &Request) -> String {
    request
        .extensions()
        .get::<ClientAddr>()
        .map(|c| c.0.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn global_rate_limit(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let addr = client_addr(&request);
    let path = request.uri().path().to_string();
    let credential = bearer_token(request.headers()).ok().map(str::to_string);

    let subject = Subject {
        addr: &addr,
        identity: None,
        credential: credential.as_deref(),
    };
    let info = match state.rate_limiter.check_global(&subject, &path) {
        Ok(info) => info,
        Err(e) => return reject("rate_limit", e),
    };

    let mut response = next.run(request).await;
    if let Some(info) = info {
        merge_rate_limit_headers(response.headers_mut(), &info);
    }
    response
}

pub async fn route_rate_limit(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let addr = client_addr(&request);
    let path = request.uri().path().to_string();
    let identity = request.extensions().get::<Identity>().cloned();
    let credential = bearer_token(request.headers()).ok().map(str::to_string);

    let subject = Subject {
        addr: &addr,
        identity: identity.as_ref(),
        credential: credential.as_deref(),
    };
    let info = match state.rate_limiter.check_route(&subject, &path) {
        Ok(info) => info,
        Err(e) => return reject("rate_limit", e),
    };

    let mut response = next.run(request).await;
    if let Some(info) = info {
        apply_rate_limit_headers(response.headers_mut(), &info);
    }
    response
}
