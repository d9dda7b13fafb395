//! Role-based access control.
//!
//! # Decision order
//! ```text
//! identity present?      → AUTH_REQUIRED (401)
//! custom predicate       → INSUFFICIENT_ROLE (403, "custom check failed")
//! role hierarchy         → INSUFFICIENT_ROLE (403)
//! permissions ⊆ effective→ INSUFFICIENT_PERMISSIONS (403)
//! organization scope     → ORG_ACCESS_DENIED (403)
//! ```
//! Every decision, allow or deny, appends exactly one audit entry.

use axum::http::{HeaderMap, Method};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::routing::matcher::PathParams;
use crate::security::audit::{AuditLog, AuditRecord};
use crate::security::headers::X_ORGANIZATION_ID;
use crate::security::identity::{Action, Identity, Permission, Resource, Role};
use crate::security::payload::RequestPayload;

const ORGANIZATION_FIELD: &str = "organizationId";

use Action::*;
use Resource::*;

const MEMBER_GRANTS: &[Permission] = &[
    Permission::new(Read, Members),
    Permission::new(Update, Members),
    Permission::new(Create, Claims),
    Permission::new(Read, Claims),
    Permission::new(Read, Contributions),
    Permission::new(Create, Medical),
    Permission::new(Read, Medical),
    Permission::new(Create, Voting),
    Permission::new(Read, Voting),
];

const PENSION_OFFICER_GRANTS: &[Permission] = &[
    Permission::new(Create, Members),
    Permission::new(Update, Claims),
    Permission::new(Create, Contributions),
    Permission::new(Update, Contributions),
    Permission::new(Update, Medical),
    Permission::new(Read, Payments),
    Permission::new(Read, Analytics),
    Permission::new(Read, Reports),
    Permission::new(Create, Reports),
];

const ADMIN_GRANTS: &[Permission] = &[
    Permission::new(Delete, Members),
    Permission::new(Delete, Claims),
    Permission::new(Delete, Contributions),
    Permission::new(Delete, Medical),
    Permission::new(Create, Payments),
    Permission::new(Update, Payments),
    Permission::new(Create, Users),
    Permission::new(Read, Users),
    Permission::new(Update, Users),
    Permission::new(Read, Organizations),
    Permission::new(Update, Voting),
    Permission::new(Delete, Voting),
    Permission::new(Read, Audit),
    Permission::new(Read, Settings),
];

/// Permissions a role adds on top of the roles below it.
fn role_grants(role: Role) -> &'static [Permission] {
    match role {
        Role::Guest => &[],
        Role::Member => MEMBER_GRANTS,
        Role::PensionOfficer => PENSION_OFFICER_GRANTS,
        Role::Admin => ADMIN_GRANTS,
        Role::SuperAdmin => &[],
    }
}

/// Default permission set of a role. Super-admin holds the whole catalog.
pub fn default_permissions(role: Role) -> BTreeSet<Permission> {
    if role == Role::SuperAdmin {
        return Permission::all().collect();
    }
    Role::ALL
        .into_iter()
        .filter(|r| role.satisfies(*r))
        .flat_map(|r| role_grants(r).iter().copied())
        .collect()
}

/// `identity.permissions ∪ default_permissions(identity.role)`.
pub fn effective_permissions(identity: &Identity) -> BTreeSet<Permission> {
    let mut perms = default_permissions(identity.role);
    perms.extend(identity.permissions.iter().copied());
    perms
}

pub fn has_permission(identity: &Identity, permission: Permission) -> bool {
    identity.permissions.contains(&permission)
        || default_permissions(identity.role).contains(&permission)
}

/// Role catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct RoleInfo {
    pub role: Role,
    pub level: u8,
    pub permissions: Vec<String>,
}

pub fn role_catalog() -> Vec<RoleInfo> {
    Role::ALL
        .into_iter()
        .map(|role| RoleInfo {
            role,
            level: role.level(),
            permissions: default_permissions(role).iter().map(|p| p.to_string()).collect(),
        })
        .collect()
}

/// Everything the access controller may look at for one request.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub params: &'a PathParams,
    pub payload: Option<&'a RequestPayload>,
    pub headers: &'a HeaderMap,
    pub client_address: &'a str,
}

impl AccessRequest<'_> {
    fn user_agent(&self) -> String {
        self.headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Target organization: path parameter, then body, then query, then header.
    pub fn target_organization(&self) -> Option<String> {
        if let Some(id) = self.params.get(ORGANIZATION_FIELD).filter(|s| !s.is_empty()) {
            return Some(id.clone());
        }
        if let Some(payload) = self.payload {
            if let Some(id) = payload.body_field(ORGANIZATION_FIELD) {
                return Some(id);
            }
            if let Some(id) = payload.query_field(ORGANIZATION_FIELD) {
                return Some(id);
            }
        }
        // Gateway-set by `authenticate` after the client's copy is stripped,
        // so this resolves to the caller's own organization.
        self.headers
            .get(X_ORGANIZATION_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

type PredicateFn = dyn Fn(&AccessRequest<'_>, &Identity) -> bool + Send + Sync;

/// A named request predicate attached to a policy.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl CustomPredicate {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&AccessRequest<'_>, &Identity) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Look up a built-in predicate by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "read-only" => Some(Self::new(name, |req, _| {
                req.method == Method::GET || req.method == Method::HEAD
            })),
            "same-user" => Some(Self::new(name, |req, identity| {
                identity.role.satisfies(Role::Admin)
                    || req.params.get("userId").is_some_and(|id| *id == identity.id)
            })),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, req: &AccessRequest<'_>, identity: &Identity) -> bool {
        (self.check)(req, identity)
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate").field("name", &self.name).finish()
    }
}

/// Requirements attached to a route.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub required_roles: Option<BTreeSet<Role>>,
    pub required_permissions: Option<BTreeSet<Permission>>,
    pub organization_scoped: bool,
    pub custom: Option<CustomPredicate>,
}

impl AccessPolicy {
    /// Only requires an authenticated caller.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            required_roles: Some(roles.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn permissions(perms: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            required_permissions: Some(perms.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn organization_scoped(mut self) -> Self {
        self.organization_scoped = true;
        self
    }

    pub fn with_predicate(mut self, predicate: CustomPredicate) -> Self {
        self.custom = Some(predicate);
        self
    }
}

fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pure policy evaluation, no side effects.
pub fn evaluate(
    identity: Option<&Identity>,
    policy: &AccessPolicy,
    req: &AccessRequest<'_>,
) -> Result<(), GatewayError> {
    let identity = identity.ok_or(GatewayError::AuthRequired)?;

    if let Some(predicate) = &policy.custom {
        if !predicate.check(req, identity) {
            return Err(GatewayError::InsufficientRole(format!(
                "custom check failed ({})",
                predicate.name()
            )));
        }
    }

    if let Some(required) = policy.required_roles.as_ref().filter(|r| !r.is_empty()) {
        if !required.iter().any(|r| identity.role.satisfies(*r)) {
            return Err(GatewayError::InsufficientRole(format!(
                "insufficient role: requires one of [{}], current role {}",
                join(required),
                identity.role
            )));
        }
    }

    if let Some(required) = &policy.required_permissions {
        let effective = effective_permissions(identity);
        if !required.is_subset(&effective) {
            return Err(GatewayError::InsufficientPermissions(format!(
                "insufficient permissions: requires [{}], current [{}]",
                join(required),
                join(&effective)
            )));
        }
    }

    if policy.organization_scoped && identity.role != Role::SuperAdmin {
        if let Some(target) = req.target_organization() {
            if identity.organization_id.as_deref() != Some(target.as_str()) {
                return Err(GatewayError::OrgAccessDenied(format!(
                    "organization mismatch: requested {}, caller belongs to {}",
                    target,
                    identity.organization_id.as_deref().unwrap_or("none")
                )));
            }
        }
    }

    Ok(())
}

/// Evaluates policies and records every decision.
#[derive(Debug, Clone)]
pub struct AccessController {
    audit: Arc<AuditLog>,
}

impl AccessController {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self { audit }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn authorize(
        &self,
        identity: Option<&Identity>,
        policy: &AccessPolicy,
        req: &AccessRequest<'_>,
    ) -> Result<(), GatewayError> {
        let decision = evaluate(identity, policy, req);

        self.audit.append(AuditRecord {
            user_id: identity.map_or_else(|| "anonymous".to_string(), |i| i.id.clone()),
            action: req.method.to_string(),
            resource: req.path.to_string(),
            success: decision.is_ok(),
            reason: decision.as_ref().err().map(|e| e.to_string()),
            organization_id: identity.and_then(|i| i.organization_id.clone()),
            client_address: req.client_address.to_string(),
            user_agent: req.user_agent(),
        });

        if let Err(e) = &decision {
            tracing::warn!(
                user = identity.map(|i| i.id.as_str()).unwrap_or("anonymous"),
                path = %req.path,
                code = e.code(),
                reason = %e,
                "Access denied"
            );
        }
        decision
    }
}
