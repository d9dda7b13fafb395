//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, addresses parse)
//! - Compile every pattern the runtime will compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, WindowConfig};
use crate::routing::matcher::PathPattern;
use crate::routing::router::Route;
use crate::security::ip_filter::IpRule;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl ToString) -> Self {
        ValidationError::Invalid {
            field: field.into(),
            message: message.to_string(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ValidationError::Invalid { field, .. } => field,
        }
    }
}

fn check_window(errors: &mut Vec<ValidationError>, field: &str, window: &WindowConfig) {
    if window.window_ms == 0 {
        errors.push(ValidationError::new(field, "window_ms must be greater than zero"));
    }
    if window.max_requests == 0 {
        errors.push(ValidationError::new(field, "max_requests must be greater than zero"));
    }
}

fn check_ip_patterns(errors: &mut Vec<ValidationError>, field: &str, patterns: &[String]) {
    for pattern in patterns {
        if let Err(e) = pattern.parse::<IpRule>() {
            errors.push(ValidationError::new(field, e));
        }
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, address: &str) {
    if address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("`{}` is not a socket address", address),
        ));
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than zero"));
    }

    if config.auth.jwt_secret.trim().is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "must not be empty"));
    }
    if config.auth.issuer.trim().is_empty() {
        errors.push(ValidationError::new("auth.issuer", "must not be empty"));
    }

    for (i, route) in config.routes.iter().enumerate() {
        if let Err(e) = Route::compile(route) {
            errors.push(ValidationError::new(format!("routes[{}]", i), e));
        }
    }

    let limits = &config.rate_limit;
    check_window(&mut errors, "rate_limit.ip", &limits.ip);
    check_window(&mut errors, "rate_limit.user", &limits.user);
    for (role, window) in [
        ("guest", &limits.roles.guest),
        ("member", &limits.roles.member),
        ("pension_officer", &limits.roles.pension_officer),
        ("admin", &limits.roles.admin),
        ("super_admin", &limits.roles.super_admin),
    ] {
        check_window(&mut errors, &format!("rate_limit.roles.{}", role), window);
    }
    for (kind, rules) in [("endpoints", &limits.endpoints), ("presets", &limits.presets)] {
        for rule in rules.iter() {
            let field = format!("rate_limit.{}.{}", kind, rule.name);
            check_window(&mut errors, &field, &rule.window);
            if !rule.prefix.starts_with('/') {
                errors.push(ValidationError::new(field, "prefix must start with '/'"));
            }
        }
    }
    check_ip_patterns(&mut errors, "rate_limit.bypass_addresses", &limits.bypass_addresses);

    check_ip_patterns(&mut errors, "ip_filter.whitelist", &config.ip_filter.whitelist);
    check_ip_patterns(&mut errors, "ip_filter.blacklist", &config.ip_filter.blacklist);

    for route in &config.sanitizer.skip_routes {
        if let Err(e) = PathPattern::parse(route) {
            errors.push(ValidationError::new("sanitizer.skip_routes", e));
        }
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = " ".into();
        config.rate_limit.ip = WindowConfig::new(0, 0);
        config.ip_filter.whitelist = vec!["300.1.1.1/8".into()];
        config.sanitizer.skip_routes = vec!["relative/path".into()];
        config.routes.push(RouteConfig {
            name: "broken".into(),
            pattern: "/x".into(),
            predicate: Some("owner-only".into()),
            ..RouteConfig::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field()).collect();
        assert_eq!(
            fields,
            vec![
                "auth.jwt_secret",
                "routes[22]",
                "rate_limit.ip",
                "rate_limit.ip",
                "ip_filter.whitelist",
                "sanitizer.skip_routes",
            ]
        );
    }

    #[test]
    fn test_bad_addresses() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "localhost".into();
        config.observability.metrics_address = "nowhere".into();
        assert_eq!(validate_config(&config).unwrap_err().len(), 2);

        config.observability.metrics_enabled = false;
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }
}
