//! Administrative surface.
//!
//! Handlers sit behind the full admission pipeline; their access rules
//! come from the route table like any other path.

pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};

use self::handlers::*;
use crate::http::server::GatewayState;

pub fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/rbac/me/permissions", get(get_my_permissions))
        .route("/api/rbac/check", post(check_permission))
        .route("/api/rbac/roles", get(get_roles))
        .route("/api/rbac/audit", get(get_audit_log))
        .route("/api/rate-limit/status", get(get_rate_limit_status))
        .route("/api/rate-limit/metrics", get(get_rate_limit_metrics))
        .route("/api/ip-filter/status", get(get_ip_status))
        .route("/api/ip-filter/config", get(get_ip_config))
        .route("/api/ip-filter/{list}", post(add_ip_rule).delete(clear_ip_list))
        .route("/api/ip-filter/{list}/{pattern}", delete(remove_ip_rule))
        .route(
            "/api/sanitizer/config",
            get(get_sanitizer_config).put(update_sanitizer_config),
        )
        .route(
            "/api/sanitizer/skip-fields",
            post(add_skip_field).delete(remove_skip_field),
        )
        .route(
            "/api/sanitizer/skip-routes",
            post(add_skip_route).delete(remove_skip_route),
        )
        .route("/api/sanitizer/test", post(test_sanitizer))
}
