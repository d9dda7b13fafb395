//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::identity::{Permission, Role};
use crate::security::sanitizer::SanitizeMode;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Bearer token verification.
    pub auth: AuthConfig,

    /// Ordered access rules; first match wins.
    pub routes: Vec<RouteConfig>,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// IP allow/deny lists.
    pub ip_filter: IpFilterConfig,

    /// Payload sanitization.
    pub sanitizer: SanitizerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Bearer token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to verify (and, for dev tooling, sign) tokens.
    pub jwt_secret: String,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,

    /// Lifetime of tokens minted by the dev tooling.
    pub token_ttl_secs: u64,

    /// Path prefixes that skip authentication entirely.
    pub public_prefixes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            issuer: "pension-portal".to_string(),
            leeway_secs: 0,
            token_ttl_secs: 3600,
            public_prefixes: vec![
                "/health".to_string(),
                "/api/auth/login".to_string(),
                "/api/auth/register".to_string(),
                "/api/auth/forgot-password".to_string(),
                "/api/auth/reset-password".to_string(),
                "/api/public".to_string(),
            ],
        }
    }
}

/// Access rule for a route pattern.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path pattern: literal segments, `:param` segments, optional trailing `*`.
    pub pattern: String,

    /// HTTP methods this rule applies to (empty = any).
    pub methods: Vec<String>,

    /// Caller must be at least as senior as one of these roles.
    pub roles: Vec<Role>,

    /// Caller must hold every one of these permissions.
    pub permissions: Vec<Permission>,

    /// Restrict the caller to their own organization.
    pub organization_scoped: bool,

    /// Name of a built-in predicate (`read-only`, `same-user`).
    pub predicate: Option<String>,

    /// Apply the strict IP filter variant.
    pub strict_ip: bool,

    /// Force a sanitization mode for this route.
    pub sanitize_mode: Option<SanitizeMode>,
}

impl RouteConfig {
    fn rule(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            ..Default::default()
        }
    }

    fn roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    fn permissions(mut self, perms: &[&str]) -> Self {
        self.permissions = perms.iter().filter_map(|p| p.parse().ok()).collect();
        self
    }

    fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    fn org_scoped(mut self) -> Self {
        self.organization_scoped = true;
        self
    }

    fn strict_ip(mut self) -> Self {
        self.strict_ip = true;
        self
    }
}

/// The portal's default route table.
pub fn default_routes() -> Vec<RouteConfig> {
    use Role::*;
    vec![
        RouteConfig::rule("rbac-audit", "/api/rbac/audit").roles(&[SuperAdmin]),
        RouteConfig::rule("rbac", "/api/rbac/*"),
        RouteConfig::rule("rate-limit-metrics", "/api/rate-limit/metrics").roles(&[Admin]),
        RouteConfig::rule("rate-limit", "/api/rate-limit/*"),
        RouteConfig::rule("ip-filter-status", "/api/ip-filter/status"),
        RouteConfig::rule("ip-filter-admin", "/api/ip-filter/*")
            .roles(&[SuperAdmin])
            .strict_ip(),
        RouteConfig::rule("sanitizer-config-read", "/api/sanitizer/config")
            .methods(&["GET"])
            .roles(&[Admin]),
        RouteConfig::rule("sanitizer-test", "/api/sanitizer/test").roles(&[Admin]),
        RouteConfig::rule("sanitizer-admin", "/api/sanitizer/*").roles(&[SuperAdmin]),
        RouteConfig::rule("organization", "/api/organizations/:organizationId/*")
            .roles(&[Member])
            .org_scoped(),
        RouteConfig::rule("organizations", "/api/organizations/*").roles(&[Admin]),
        RouteConfig::rule("members", "/api/members/*")
            .roles(&[Member])
            .permissions(&["read:members"])
            .org_scoped(),
        RouteConfig::rule("claims", "/api/claims/*")
            .roles(&[Member])
            .permissions(&["read:claims"])
            .org_scoped(),
        RouteConfig::rule("contributions", "/api/contributions/*")
            .roles(&[Member])
            .permissions(&["read:contributions"])
            .org_scoped(),
        RouteConfig::rule("medical", "/api/medical/*")
            .roles(&[Member])
            .permissions(&["read:medical"])
            .org_scoped(),
        RouteConfig::rule("voting", "/api/voting/*")
            .roles(&[Member])
            .permissions(&["read:voting"]),
        RouteConfig::rule("payments", "/api/payments/*")
            .roles(&[PensionOfficer])
            .permissions(&["read:payments"])
            .org_scoped(),
        RouteConfig::rule("analytics", "/api/analytics/*")
            .roles(&[PensionOfficer])
            .permissions(&["read:analytics"]),
        RouteConfig::rule("reports", "/api/reports/*")
            .roles(&[PensionOfficer])
            .permissions(&["read:reports"]),
        RouteConfig {
            predicate: Some("same-user".to_string()),
            ..RouteConfig::rule("user-self", "/api/users/:userId").roles(&[Member])
        },
        RouteConfig::rule("users", "/api/users/*").roles(&[Admin]),
        RouteConfig::rule("admin", "/api/admin/*").roles(&[Admin]),
    ]
}

/// A fixed window quota.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct WindowConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u32,

    /// Reject requests arriving faster than `window_ms / max_requests`
    /// after the previous accepted one. Set to `false` to allow bursts.
    #[serde(default = "default_spread_evenly")]
    pub spread_evenly: bool,
}

fn default_spread_evenly() -> bool {
    true
}

impl WindowConfig {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            spread_evenly: true,
        }
    }

    /// Only the window cap applies.
    pub const fn burst(mut self) -> Self {
        self.spread_evenly = false;
        self
    }
}

const FIFTEEN_MINUTES_MS: u64 = 15 * 60 * 1000;
const ONE_HOUR_MS: u64 = 60 * 60 * 1000;

/// Per-role quotas, increasing with seniority.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoleQuotas {
    pub guest: WindowConfig,
    pub member: WindowConfig,
    pub pension_officer: WindowConfig,
    pub admin: WindowConfig,
    pub super_admin: WindowConfig,
}

impl RoleQuotas {
    pub fn for_role(&self, role: Role) -> WindowConfig {
        match role {
            Role::Guest => self.guest,
            Role::Member => self.member,
            Role::PensionOfficer => self.pension_officer,
            Role::Admin => self.admin,
            Role::SuperAdmin => self.super_admin,
        }
    }
}

impl Default for RoleQuotas {
    fn default() -> Self {
        Self {
            guest: WindowConfig::new(FIFTEEN_MINUTES_MS, 50),
            member: WindowConfig::new(FIFTEEN_MINUTES_MS, 200),
            pension_officer: WindowConfig::new(FIFTEEN_MINUTES_MS, 500),
            admin: WindowConfig::new(FIFTEEN_MINUTES_MS, 1000),
            super_admin: WindowConfig::new(FIFTEEN_MINUTES_MS, 5000),
        }
    }
}

/// A quota bound to a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrefixLimitConfig {
    /// Identifier reported in `blockedBy` and status output.
    pub name: String,

    /// Path prefix the quota applies to.
    pub prefix: String,

    #[serde(flatten)]
    pub window: WindowConfig,
}

impl PrefixLimitConfig {
    fn new(name: &str, prefix: &str, window: WindowConfig) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            window,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Per client address, applied before authentication.
    pub ip: WindowConfig,

    /// Per user (or anonymous key), applied after authentication.
    pub user: WindowConfig,

    pub roles: RoleQuotas,

    /// Sensitive endpoints with tighter caps; first match wins.
    pub endpoints: Vec<PrefixLimitConfig>,

    /// Authentication presets applied before the IP dimension; first match wins.
    pub presets: Vec<PrefixLimitConfig>,

    /// Addresses (exact, CIDR or wildcard) never limited.
    pub bypass_addresses: Vec<String>,

    /// Roles that skip the post-authentication stage.
    pub bypass_roles: Vec<Role>,

    /// Size of the top blocked addresses/users lists.
    pub top_n: usize,

    /// Interval of the stale bucket sweep in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip: WindowConfig::new(FIFTEEN_MINUTES_MS, 1000),
            user: WindowConfig::new(FIFTEEN_MINUTES_MS, 500),
            roles: RoleQuotas::default(),
            endpoints: vec![
                PrefixLimitConfig::new(
                    "payments",
                    "/api/payments",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 50),
                ),
                PrefixLimitConfig::new(
                    "analytics",
                    "/api/analytics",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 100),
                ),
                PrefixLimitConfig::new(
                    "users",
                    "/api/users",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 200),
                ),
                PrefixLimitConfig::new(
                    "organizations",
                    "/api/organizations",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 100),
                ),
            ],
            presets: vec![
                PrefixLimitConfig::new(
                    "password-reset",
                    "/api/auth/reset-password",
                    WindowConfig::new(ONE_HOUR_MS, 3),
                ),
                PrefixLimitConfig::new(
                    "password-reset",
                    "/api/auth/forgot-password",
                    WindowConfig::new(ONE_HOUR_MS, 3),
                ),
                PrefixLimitConfig::new(
                    "login",
                    "/api/auth/login",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 5),
                ),
                PrefixLimitConfig::new(
                    "auth",
                    "/api/auth",
                    WindowConfig::new(FIFTEEN_MINUTES_MS, 20),
                ),
            ],
            bypass_addresses: Vec::new(),
            bypass_roles: vec![Role::SuperAdmin],
            top_n: 10,
            sweep_interval_secs: 60,
        }
    }
}

/// IP filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpFilterConfig {
    /// Enable the (non-strict) filter.
    pub enabled: bool,

    /// Seed allow list.
    pub whitelist: Vec<String>,

    /// Seed deny list.
    pub blacklist: Vec<String>,

    /// Admins skip the non-strict filter.
    pub admin_bypass: bool,

    /// Super-admins skip the filter (strict variant included).
    pub super_admin_bypass: bool,
}

impl Default for IpFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            admin_bypass: false,
            super_admin_bypass: true,
        }
    }
}

/// Sanitizer configuration. Also the shape of the live, mutable settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizerConfig {
    pub enabled: bool,

    /// Reject instead of excise.
    pub strict: bool,

    /// HTML allowlist transform.
    pub html: bool,
    pub sql_injection: bool,
    pub nosql_injection: bool,
    pub path_traversal: bool,
    pub script_tags: bool,

    /// Field paths (`body.password`) or bare field names (`password`) left untouched.
    pub skip_fields: Vec<String>,

    /// Route patterns (`/api/documents/*`) left untouched.
    pub skip_routes: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            html: true,
            sql_injection: true,
            nosql_injection: true,
            path_traversal: true,
            script_tags: true,
            skip_fields: vec!["password".to_string(), "confirmPassword".to_string()],
            skip_routes: vec!["/api/sanitizer/test".to_string()],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security response headers.
    pub enable_headers: bool,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            auth: AuthConfig::default(),
            routes: default_routes(),
            rate_limit: RateLimitConfig::default(),
            ip_filter: IpFilterConfig::default(),
            sanitizer: SanitizerConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}
