//! Admission pipeline stages as axum middleware.
//!
//! # Order
//! ```text
//! observe → prepare → ip_filter → sanitize → rate_limit (global)
//!         → authenticate → access_control → rate_limit (route) → handler
//! ```
//! A failing stage renders its `GatewayError` and later stages never run.

use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::observability::metrics;

pub mod access_control;
pub mod authenticate;
pub mod context;
pub mod ip_filter;
pub mod rate_limit;
pub mod sanitize;

/// Render a stage failure and count it.
pub(crate) fn reject(stage: &'static str, err: GatewayError) -> Response {
    metrics::record_rejection(stage, err.code());
    err.into_response()
}
