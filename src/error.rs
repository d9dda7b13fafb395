//! Gateway error taxonomy and its HTTP rendering.
//!
//! Every terminal decision of the admission pipeline is a `GatewayError`.
//! The code string is stable and part of the public contract; the message
//! is human-readable and never carries internal details for 5xx errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::response::apply_rate_limit_headers;
use crate::security::ip_filter::IpPatternError;
use crate::security::rate_limit::{Dimension, RateLimitInfo};
use crate::security::sanitizer::SanitizeError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no bearer token provided")]
    NoToken,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is invalid")]
    InvalidToken,

    #[error("token validation failed: {0}")]
    ValidationFailed(String),

    #[error("not authenticated")]
    AuthRequired,

    #[error("{0}")]
    InsufficientRole(String),

    #[error("{0}")]
    InsufficientPermissions(String),

    #[error("{0}")]
    OrgAccessDenied(String),

    #[error("client address is blacklisted")]
    IpBlacklisted,

    #[error("client address is not whitelisted")]
    IpNotWhitelisted,

    #[error("no IP whitelist configured for this route")]
    NoWhitelistConfigured,

    #[error("rate limit exceeded ({dimension})")]
    RateLimitExceeded {
        dimension: Dimension,
        info: RateLimitInfo,
    },

    #[error(transparent)]
    Sanitization(#[from] SanitizeError),

    #[error(transparent)]
    InvalidIpPattern(#[from] IpPatternError),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NoToken => "NO_TOKEN",
            GatewayError::TokenExpired => "TOKEN_EXPIRED",
            GatewayError::InvalidToken => "INVALID_TOKEN",
            GatewayError::ValidationFailed(_) => "VALIDATION_FAILED",
            GatewayError::AuthRequired => "AUTH_REQUIRED",
            GatewayError::InsufficientRole(_) => "INSUFFICIENT_ROLE",
            GatewayError::InsufficientPermissions(_) => "INSUFFICIENT_PERMISSIONS",
            GatewayError::OrgAccessDenied(_) => "ORG_ACCESS_DENIED",
            GatewayError::IpBlacklisted => "IP_BLACKLISTED",
            GatewayError::IpNotWhitelisted => "IP_NOT_WHITELISTED",
            GatewayError::NoWhitelistConfigured => "NO_WHITELIST_CONFIGURED",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::Sanitization(_) => "SANITIZATION_ERROR",
            GatewayError::InvalidIpPattern(_) => "INVALID_IP_PATTERN",
            GatewayError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoToken
            | GatewayError::TokenExpired
            | GatewayError::InvalidToken
            | GatewayError::ValidationFailed(_)
            | GatewayError::AuthRequired => StatusCode::UNAUTHORIZED,
            GatewayError::InsufficientRole(_)
            | GatewayError::InsufficientPermissions(_)
            | GatewayError::OrgAccessDenied(_)
            | GatewayError::IpBlacklisted
            | GatewayError::IpNotWhitelisted
            | GatewayError::NoWhitelistConfigured => StatusCode::FORBIDDEN,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Sanitization(_)
            | GatewayError::InvalidIpPattern(_)
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller.
    fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "Unhandled gateway error");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        let mut response = (self.status(), Json(body)).into_response();

        if let GatewayError::RateLimitExceeded { info, .. } = &self {
            apply_rate_limit_headers(response.headers_mut(), info);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::NoToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::AuthRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::InsufficientRole("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GatewayError::IpBlacklisted.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::Internal("db exploded".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err = GatewayError::Internal("secret stack trace".into());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_rate_limit_response_headers() {
        let err = GatewayError::RateLimitExceeded {
            dimension: Dimension::Ip,
            info: RateLimitInfo {
                limit: 10,
                remaining: 0,
                reset_at: 1_700_000_060,
                retry_after_secs: Some(42),
            },
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }
}
