//! Configuration loading from disk and environment.
//!
//! File values are read first, then `GATEWAY_*` environment variables
//! override them, then the result is validated as a whole.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::identity::Role;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value `{value}` for {var}")]
    Env { var: String, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content, |key| std::env::var(key).ok())
}

/// Same as `load_config` for in-memory TOML with an explicit environment.
pub fn load_config_str(
    content: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Defaults plus environment overrides, validated.
pub fn from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply `GATEWAY_*` overrides. Lists are comma-separated.
pub fn apply_env_overrides(
    config: &mut GatewayConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let string_vars: [(&str, &mut String); 5] = [
        ("GATEWAY_BIND_ADDRESS", &mut config.listener.bind_address),
        ("GATEWAY_JWT_SECRET", &mut config.auth.jwt_secret),
        ("GATEWAY_JWT_ISSUER", &mut config.auth.issuer),
        ("GATEWAY_LOG_LEVEL", &mut config.observability.log_level),
        ("GATEWAY_METRICS_ADDRESS", &mut config.observability.metrics_address),
    ];
    for (var, target) in string_vars {
        if let Some(value) = env(var) {
            *target = value;
        }
    }

    let bool_vars: [(&str, &mut bool); 9] = [
        ("GATEWAY_RATE_LIMIT_ENABLED", &mut config.rate_limit.enabled),
        ("GATEWAY_IP_FILTER_ENABLED", &mut config.ip_filter.enabled),
        ("GATEWAY_IP_ADMIN_BYPASS", &mut config.ip_filter.admin_bypass),
        ("GATEWAY_IP_SUPER_ADMIN_BYPASS", &mut config.ip_filter.super_admin_bypass),
        ("GATEWAY_SANITIZER_ENABLED", &mut config.sanitizer.enabled),
        ("GATEWAY_SANITIZER_STRICT", &mut config.sanitizer.strict),
        ("GATEWAY_JSON_LOGS", &mut config.observability.json_logs),
        ("GATEWAY_METRICS_ENABLED", &mut config.observability.metrics_enabled),
        ("GATEWAY_SECURITY_HEADERS", &mut config.security.enable_headers),
    ];
    for (var, target) in bool_vars {
        if let Some(value) = env(var) {
            *target = parse_bool(var, &value)?;
        }
    }

    let list_vars: [(&str, &mut Vec<String>); 6] = [
        ("GATEWAY_IP_WHITELIST", &mut config.ip_filter.whitelist),
        ("GATEWAY_IP_BLACKLIST", &mut config.ip_filter.blacklist),
        ("GATEWAY_RATE_LIMIT_BYPASS_ADDRESSES", &mut config.rate_limit.bypass_addresses),
        ("GATEWAY_SANITIZER_SKIP_FIELDS", &mut config.sanitizer.skip_fields),
        ("GATEWAY_SANITIZER_SKIP_ROUTES", &mut config.sanitizer.skip_routes),
        ("GATEWAY_PUBLIC_PREFIXES", &mut config.auth.public_prefixes),
    ];
    for (var, target) in list_vars {
        if let Some(value) = env(var) {
            *target = parse_list(&value);
        }
    }

    if let Some(value) = env("GATEWAY_RATE_LIMIT_BYPASS_ROLES") {
        config.rate_limit.bypass_roles = parse_list(&value)
            .iter()
            .map(|r| {
                r.parse::<Role>().map_err(|_| ConfigError::Env {
                    var: "GATEWAY_RATE_LIMIT_BYPASS_ROLES".to_string(),
                    value: value.clone(),
                })
            })
            .collect::<Result<_, _>>()?;
    }

    Ok(())
}
