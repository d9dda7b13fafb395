//! Route table lookup.
//!
//! # Responsibilities
//! - Compile route rules into matchers and access policies
//! - Look up the rule for a request
//! - Fall back to an authenticated-only policy when nothing matches
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) ordered scan, first match wins
//! - Unknown predicate names fail construction instead of being ignored

use axum::http::Method;
use std::sync::Arc;

use crate::config::schema::RouteConfig;
use crate::routing::matcher::{MethodMatcher, PathParams, PathPattern, PatternError};
use crate::security::ip_filter::FilterMode;
use crate::security::rbac::{AccessPolicy, CustomPredicate};
use crate::security::sanitizer::SanitizeMode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("route `{route}`: {source}")]
    Pattern {
        route: String,
        #[source]
        source: PatternError,
    },
    #[error("route `{route}`: {message}")]
    Method { route: String, message: String },
    #[error("route `{route}`: unknown predicate `{predicate}`")]
    UnknownPredicate { route: String, predicate: String },
}

/// A compiled route rule.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pattern: PathPattern,
    methods: MethodMatcher,
    pub policy: AccessPolicy,
    pub ip_mode: FilterMode,
    pub sanitize_mode: Option<SanitizeMode>,
}

impl Route {
    pub fn compile(config: &RouteConfig) -> Result<Self, RouteError> {
        let pattern = PathPattern::parse(&config.pattern).map_err(|source| RouteError::Pattern {
            route: config.name.clone(),
            source,
        })?;
        let methods = MethodMatcher::new(&config.methods).map_err(|message| RouteError::Method {
            route: config.name.clone(),
            message,
        })?;

        let mut policy = AccessPolicy {
            required_roles: (!config.roles.is_empty())
                .then(|| config.roles.iter().copied().collect()),
            required_permissions: (!config.permissions.is_empty())
                .then(|| config.permissions.iter().copied().collect()),
            organization_scoped: config.organization_scoped,
            custom: None,
        };
        if let Some(name) = &config.predicate {
            let predicate =
                CustomPredicate::builtin(name).ok_or_else(|| RouteError::UnknownPredicate {
                    route: config.name.clone(),
                    predicate: name.clone(),
                })?;
            policy = policy.with_predicate(predicate);
        }

        Ok(Self {
            name: config.name.clone(),
            pattern,
            methods,
            policy,
            ip_mode: if config.strict_ip {
                FilterMode::Strict
            } else {
                FilterMode::Standard
            },
            sanitize_mode: config.sanitize_mode,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Result of a lookup, attached to the request for later stages.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    route: Option<Arc<Route>>,
    pub params: PathParams,
}

impl RouteMatch {
    pub fn unmatched() -> Self {
        Self {
            route: None,
            params: PathParams::new(),
        }
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }

    pub fn name(&self) -> &str {
        self.route().map_or("unmatched", |r| r.name.as_str())
    }

    pub fn policy(&self) -> AccessPolicy {
        self.route()
            .map_or_else(AccessPolicy::authenticated, |r| r.policy.clone())
    }

    pub fn ip_mode(&self) -> FilterMode {
        self.route().map_or(FilterMode::Standard, |r| r.ip_mode)
    }

    pub fn sanitize_mode(&self) -> Option<SanitizeMode> {
        self.route().and_then(|r| r.sanitize_mode)
    }
}

/// Ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn new(configs: &[RouteConfig]) -> Result<Self, RouteError> {
        let routes = configs
            .iter()
            .map(|c| Route::compile(c).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        for route in &self.routes {
            if !route.methods.matches(method) {
                continue;
            }
            if let Some(params) = route.pattern.match_path(path) {
                return RouteMatch {
                    route: Some(Arc::clone(route)),
                    params,
                };
            }
        }
        RouteMatch::unmatched()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::default_routes;
    use crate::security::identity::Role;

    fn router() -> Router {
        Router::new(&default_routes()).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let r = router();
        assert_eq!(r.lookup(&Method::GET, "/api/rbac/audit").name(), "rbac-audit");
        assert_eq!(r.lookup(&Method::GET, "/api/rbac/roles").name(), "rbac");
        assert_eq!(
            r.lookup(&Method::GET, "/api/ip-filter/status").name(),
            "ip-filter-status"
        );
        assert_eq!(r.lookup(&Method::GET, "/api/ip-filter/config").ip_mode(), FilterMode::Strict);
    }

    #[test]
    fn test_method_specific_rules() {
        let r = router();
        assert_eq!(
            r.lookup(&Method::GET, "/api/sanitizer/config").name(),
            "sanitizer-config-read"
        );
        assert_eq!(
            r.lookup(&Method::PUT, "/api/sanitizer/config").name(),
            "sanitizer-admin"
        );
    }

    #[test]
    fn test_params_and_policy() {
        let r = router();
        let m = r.lookup(&Method::GET, "/api/organizations/org-3/members");
        assert_eq!(m.name(), "organization");
        assert_eq!(m.params["organizationId"], "org-3");
        let policy = m.policy();
        assert!(policy.organization_scoped);
        assert!(policy.required_roles.unwrap().contains(&Role::Member));

        let m = r.lookup(&Method::GET, "/api/users/u-1");
        assert_eq!(m.policy().custom.unwrap().name(), "same-user");
    }

    #[test]
    fn test_unmatched_is_authenticated_only() {
        let m = router().lookup(&Method::GET, "/api/unknown");
        assert!(m.route().is_none());
        let policy = m.policy();
        assert!(policy.required_roles.is_none());
        assert!(policy.required_permissions.is_none());
        assert_eq!(m.ip_mode(), FilterMode::Standard);
    }

    #[test]
    fn test_compile_errors() {
        let bad_predicate = RouteConfig {
            name: "x".into(),
            pattern: "/x".into(),
            predicate: Some("nope".into()),
            ..RouteConfig::default()
        };
        assert!(matches!(
            Router::new(&[bad_predicate]),
            Err(RouteError::UnknownPredicate { .. })
        ));

        let bad_pattern = RouteConfig {
            name: "y".into(),
            pattern: "y".into(),
            ..RouteConfig::default()
        };
        assert!(matches!(Router::new(&[bad_pattern]), Err(RouteError::Pattern { .. })));
    }
}
