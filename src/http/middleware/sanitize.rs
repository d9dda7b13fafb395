//! Sanitizer stage.
//!
//! Buffers the body (bounded), parses query, params and body into a
//! `RequestPayload`, cleans it, and writes any change back into the
//! request. The payload is attached for the access controller.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, uri::PathAndQuery, HeaderValue, Uri},
    middleware::Next,
    response::Response,
};

use crate::error::GatewayError;
use crate::http::middleware::reject;
use crate::http::server::GatewayState;
use crate::routing::RouteMatch;
use crate::security::payload::RequestPayload;
use crate::security::sanitizer::SanitizeMode;

/// Escalates one request to strict mode. Callers cannot relax the mode.
pub const X_SANITIZE_STRICT: &str = "x-sanitize-strict";

fn requested_mode(request: &Request, route: &RouteMatch) -> Option<SanitizeMode> {
    let strict_header = request
        .headers()
        .get(X_SANITIZE_STRICT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
    if strict_header {
        Some(SanitizeMode::Strict)
    } else {
        route.sanitize_mode()
    }
}

fn rewrite_query(uri: &Uri, query: Option<String>) -> Option<Uri> {
    let path_and_query = match query {
        Some(q) => format!("{}?{}", uri.path(), q),
        None => uri.path().to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

pub async fn sanitize(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<RouteMatch>()
        .cloned()
        .unwrap_or_else(RouteMatch::unmatched);
    let mode = requested_mode(&request, &route);
    let path = request.uri().path().to_string();
    let active = state.sanitizer.applies_to(&path);

    let (mut parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => return reject("sanitizer", GatewayError::PayloadTooLarge(state.max_body_size)),
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let mut payload =
        match RequestPayload::parse(route.params.clone(), parts.uri.query(), content_type, &bytes) {
            Ok(payload) => payload,
            Err(e) if active => return reject("sanitizer", GatewayError::BadRequest(e.to_string())),
            Err(e) => {
                tracing::debug!(error = %e, "Unparsed body passed through");
                parts.extensions.insert(RequestPayload::empty());
                return next.run(Request::from_parts(parts, Body::from(bytes))).await;
            }
        };

    let mut body = bytes;
    if active {
        match state.sanitizer.sanitize_payload(&path, &mut payload, mode) {
            Ok(true) => {
                if let Some(uri) = rewrite_query(&parts.uri, payload.encode_query()) {
                    parts.uri = uri;
                }
                if let Some(encoded) = payload.encode_body() {
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
                    body = encoded.into();
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    path = %path,
                    code = "SANITIZATION_ERROR",
                    reason = %e,
                    "Payload rejected"
                );
                return reject("sanitizer", e.into());
            }
        }
    }

    parts.extensions.insert(payload);
    next.run(Request::from_parts(parts, Body::from(body))).await
}
