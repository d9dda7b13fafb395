//! Header handling: client address resolution and trusted identity headers.
//!
//! # Responsibilities
//! - Resolve the client address (first X-Forwarded-For hop, X-Real-IP, peer address)
//! - Strip caller-supplied identity headers
//! - Inject the authenticated identity for downstream services
//!
//! # Design Decisions
//! - Identity headers are always removed first, then set: never merged
//! - Stripping happens on every request, public routes included

use axum::http::{HeaderMap, HeaderValue};
use std::net::SocketAddr;

use crate::security::identity::Identity;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_USER_EMAIL: &str = "x-user-email";
pub const X_ORGANIZATION_ID: &str = "x-organization-id";
pub const X_USER_PERMISSIONS: &str = "x-user-permissions";

/// Headers that only the gateway may set.
pub const TRUSTED_IDENTITY_HEADERS: [&str; 5] = [
    X_USER_ID,
    X_USER_ROLE,
    X_USER_EMAIL,
    X_ORGANIZATION_ID,
    X_USER_PERMISSIONS,
];

/// Resolved client address, attached to the request by the first stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl ClientAddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// First forwarded hop, then X-Real-IP, then the transport peer.
pub fn resolve_client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientAddr {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let addr = forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    ClientAddr(normalize_addr(&addr))
}

/// Strip the IPv4-mapped IPv6 prefix.
pub fn normalize_addr(addr: &str) -> String {
    let lower = addr.to_ascii_lowercase();
    match lower.strip_prefix("::ffff:") {
        Some(v4) if v4.contains('.') => v4.to_string(),
        _ => addr.to_string(),
    }
}

pub fn strip_identity_headers(headers: &mut HeaderMap) {
    for name in TRUSTED_IDENTITY_HEADERS {
        headers.remove(name);
    }
}

/// Overwrite the trusted headers with the identity's fields.
pub fn inject_identity_headers(headers: &mut HeaderMap, identity: &Identity) {
    strip_identity_headers(headers);

    let permissions: Vec<String> = identity.permissions.iter().map(|p| p.to_string()).collect();
    let permissions = serde_json::to_string(&permissions).unwrap_or_else(|_| "[]".to_string());

    let fields = [
        (X_USER_ID, Some(identity.id.as_str())),
        (X_USER_ROLE, Some(identity.role.as_str())),
        (X_USER_EMAIL, Some(identity.email.as_str())),
        (X_ORGANIZATION_ID, identity.organization_id.as_deref()),
        (X_USER_PERMISSIONS, Some(permissions.as_str())),
    ];

    for (name, value) in fields {
        let Some(value) = value else { continue };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = name, "Identity field is not a valid header value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::identity::{Permission, Role};

    #[test]
    fn test_forwarded_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert(X_REAL_IP, "198.51.100.2".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(resolve_client_addr(&headers, Some(peer)).as_str(), "203.0.113.7");
    }

    #[test]
    fn test_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.10:5000".parse().unwrap();
        assert_eq!(resolve_client_addr(&HeaderMap::new(), Some(peer)).as_str(), "192.0.2.10");
        assert_eq!(resolve_client_addr(&HeaderMap::new(), None).as_str(), "unknown");
    }

    #[test]
    fn test_ipv4_mapped_normalized() {
        assert_eq!(normalize_addr("::ffff:10.0.0.5"), "10.0.0.5");
        assert_eq!(normalize_addr("::1"), "::1");
    }

    #[test]
    fn test_injection_overwrites_spoofed_values() {
        let mut headers = HeaderMap::new();
        headers.insert(X_USER_ROLE, "super-admin".parse().unwrap());
        headers.insert(X_ORGANIZATION_ID, "org-evil".parse().unwrap());

        let identity = Identity::new("u-1", "m@example.org", Role::Member)
            .with_permissions(["read:payments".parse::<Permission>().unwrap()]);
        inject_identity_headers(&mut headers, &identity);

        assert_eq!(headers[X_USER_ROLE], "member");
        assert_eq!(headers[X_USER_ID], "u-1");
        assert!(headers.get(X_ORGANIZATION_ID).is_none());
        assert_eq!(headers[X_USER_PERMISSIONS], r#"["read:payments"]"#);
        assert_eq!(headers.get_all(X_USER_ROLE).iter().count(), 1);
    }
}
