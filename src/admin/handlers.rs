use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::schema::SanitizerConfig;
use crate::error::GatewayError;
use crate::http::server::GatewayState;
use crate::routing::matcher::PatternError;
use crate::security::audit::AuditPage;
use crate::security::authenticator::bearer_token;
use crate::security::headers::ClientAddr;
use crate::security::identity::{Identity, Permission, Role};
use crate::security::ip_filter::{IpFilterSnapshot, IpFilterStatus, ListKind};
use crate::security::rate_limit::{RateLimitMetrics, RateLimitStatus, Subject};
use crate::security::rbac::{self, RoleInfo};
use crate::security::sanitizer::{SanitizeMode, SanitizerUpdate};

const DEFAULT_AUDIT_PAGE: usize = 50;
const MAX_AUDIT_PAGE: usize = 500;

type ApiResult<T> = Result<Json<T>, GatewayError>;

fn caller(identity: Option<Extension<Identity>>) -> Result<Identity, GatewayError> {
    identity
        .map(|Extension(identity)| identity)
        .ok_or(GatewayError::AuthRequired)
}

fn client_addr(client: Option<Extension<ClientAddr>>) -> String {
    client.map_or_else(|| "unknown".to_string(), |Extension(c)| c.0)
}

fn skip_list_error(err: PatternError) -> GatewayError {
    GatewayError::BadRequest(err.to_string())
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

pub async fn get_health() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

// ---- rbac ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissions {
    pub user_id: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub permissions: Vec<Permission>,
}

pub async fn get_my_permissions(
    identity: Option<Extension<Identity>>,
) -> ApiResult<EffectivePermissions> {
    let identity = caller(identity)?;
    Ok(Json(EffectivePermissions {
        permissions: rbac::effective_permissions(&identity).into_iter().collect(),
        user_id: identity.id,
        role: identity.role,
        organization_id: identity.organization_id,
    }))
}

#[derive(Deserialize)]
pub struct PermissionCheck {
    pub resource: String,
    pub action: String,
}

#[derive(Serialize)]
pub struct PermissionVerdict {
    pub permission: String,
    pub allowed: bool,
}

pub async fn check_permission(
    identity: Option<Extension<Identity>>,
    Json(check): Json<PermissionCheck>,
) -> ApiResult<PermissionVerdict> {
    let identity = caller(identity)?;
    let permission: Permission = format!("{}:{}", check.action.trim(), check.resource.trim())
        .parse()
        .map_err(|e| GatewayError::BadRequest(format!("{}", e)))?;
    Ok(Json(PermissionVerdict {
        permission: permission.to_string(),
        allowed: rbac::has_permission(&identity, permission),
    }))
}

pub async fn get_roles() -> Json<Vec<RoleInfo>> {
    Json(rbac::role_catalog())
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn get_audit_log(
    State(state): State<GatewayState>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditPage> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_PAGE).clamp(1, MAX_AUDIT_PAGE);
    Json(state.access.audit_log().page(query.offset.unwrap_or(0), limit))
}

// ---- rate limiting ----

#[derive(Deserialize)]
pub struct StatusQuery {
    pub path: Option<String>,
}

pub async fn get_rate_limit_status(
    State(state): State<GatewayState>,
    identity: Option<Extension<Identity>>,
    client: Option<Extension<ClientAddr>>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> ApiResult<RateLimitStatus> {
    let identity = caller(identity)?;
    let addr = client_addr(client);
    let subject = Subject {
        addr: &addr,
        identity: Some(&identity),
        credential: bearer_token(&headers).ok(),
    };
    let path = query.path.as_deref().unwrap_or("/");
    Ok(Json(state.rate_limiter.status(&subject, path)))
}

pub async fn get_rate_limit_metrics(State(state): State<GatewayState>) -> Json<RateLimitMetrics> {
    Json(state.rate_limiter.metrics())
}

// ---- ip filter ----

pub async fn get_ip_status(
    State(state): State<GatewayState>,
    identity: Option<Extension<Identity>>,
    client: Option<Extension<ClientAddr>>,
) -> Json<IpFilterStatus> {
    let identity = identity.map(|Extension(i)| i);
    Json(state.ip_filter.status(&client_addr(client), identity.as_ref()))
}

pub async fn get_ip_config(State(state): State<GatewayState>) -> Json<IpFilterSnapshot> {
    Json(state.ip_filter.snapshot())
}

#[derive(Deserialize)]
pub struct PatternBody {
    pub pattern: String,
}

#[derive(Serialize)]
pub struct IpRuleAdded {
    pub pattern: String,
    pub kind: &'static str,
    pub config: IpFilterSnapshot,
}

pub async fn add_ip_rule(
    State(state): State<GatewayState>,
    Path(list): Path<String>,
    Json(body): Json<PatternBody>,
) -> ApiResult<IpRuleAdded> {
    let kind: ListKind = list.parse()?;
    let rule = state.ip_filter.add(kind, &body.pattern)?;
    Ok(Json(IpRuleAdded {
        pattern: rule.as_str().to_string(),
        kind: rule.kind_name(),
        config: state.ip_filter.snapshot(),
    }))
}

#[derive(Serialize)]
pub struct IpRuleRemoved {
    pub removed: bool,
    pub config: IpFilterSnapshot,
}

pub async fn remove_ip_rule(
    State(state): State<GatewayState>,
    Path((list, pattern)): Path<(String, String)>,
) -> ApiResult<IpRuleRemoved> {
    let kind: ListKind = list.parse()?;
    let removed = state.ip_filter.remove(kind, &pattern);
    Ok(Json(IpRuleRemoved {
        removed,
        config: state.ip_filter.snapshot(),
    }))
}

pub async fn clear_ip_list(
    State(state): State<GatewayState>,
    Path(list): Path<String>,
) -> ApiResult<IpFilterSnapshot> {
    let kind: ListKind = list.parse()?;
    state.ip_filter.clear(kind);
    Ok(Json(state.ip_filter.snapshot()))
}

// ---- sanitizer ----

pub async fn get_sanitizer_config(State(state): State<GatewayState>) -> Json<SanitizerConfig> {
    Json(state.sanitizer.config())
}

pub async fn update_sanitizer_config(
    State(state): State<GatewayState>,
    Json(update): Json<SanitizerUpdate>,
) -> Json<SanitizerConfig> {
    Json(state.sanitizer.update(&update))
}

#[derive(Deserialize)]
pub struct FieldBody {
    pub field: String,
}

#[derive(Deserialize)]
pub struct RouteBody {
    pub route: String,
}

pub async fn add_skip_field(
    State(state): State<GatewayState>,
    Json(body): Json<FieldBody>,
) -> ApiResult<SanitizerConfig> {
    if body.field.trim().is_empty() {
        return Err(GatewayError::BadRequest("field must not be empty".into()));
    }
    state.sanitizer.add_skip_field(&body.field).map(Json).map_err(skip_list_error)
}

pub async fn remove_skip_field(
    State(state): State<GatewayState>,
    Json(body): Json<FieldBody>,
) -> ApiResult<SanitizerConfig> {
    state.sanitizer.remove_skip_field(&body.field).map(Json).map_err(skip_list_error)
}

pub async fn add_skip_route(
    State(state): State<GatewayState>,
    Json(body): Json<RouteBody>,
) -> ApiResult<SanitizerConfig> {
    state.sanitizer.add_skip_route(&body.route).map(Json).map_err(skip_list_error)
}

pub async fn remove_skip_route(
    State(state): State<GatewayState>,
    Json(body): Json<RouteBody>,
) -> ApiResult<SanitizerConfig> {
    state.sanitizer.remove_skip_route(&body.route).map(Json).map_err(skip_list_error)
}

#[derive(Deserialize)]
pub struct SanitizeSample {
    pub field: String,
    pub value: Value,
    pub mode: Option<SanitizeMode>,
}

#[derive(Serialize)]
pub struct SanitizeOutcome {
    pub field: String,
    pub original: Value,
    pub sanitized: Value,
    pub modified: bool,
}

pub async fn test_sanitizer(
    State(state): State<GatewayState>,
    Json(sample): Json<SanitizeSample>,
) -> ApiResult<SanitizeOutcome> {
    let sanitized = state
        .sanitizer
        .sanitize_value(&sample.field, sample.value.clone(), sample.mode)?;
    Ok(Json(SanitizeOutcome {
        modified: sanitized != sample.value,
        field: sample.field,
        original: sample.value,
        sanitized,
    }))
}
