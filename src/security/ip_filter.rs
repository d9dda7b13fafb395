//! Client address allow/deny lists.
//!
//! # Decision order
//! 1. Caller may bypass (configured roles) → allow
//! 2. Any blacklist match → deny (blacklist always wins)
//! 3. Non-empty whitelist and no match → deny
//! 4. Otherwise allow
//!
//! The strict variant is always active, only lets super-admins bypass and
//! denies outright when the whitelist is empty.
//!
//! Lists live in `ArcSwap` snapshots: reads are lock-free and every
//! administrative change is visible to the next request.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::schema::IpFilterConfig;
use crate::error::GatewayError;
use crate::security::headers::normalize_addr;
use crate::security::identity::{Identity, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpPatternError {
    #[error("empty IP pattern")]
    Empty,
    #[error("invalid CIDR `{0}`")]
    InvalidCidr(String),
    #[error("invalid wildcard pattern `{0}`")]
    InvalidWildcard(String),
}

/// Octet of a wildcard pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Octet {
    Any,
    Value(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternKind {
    Exact(String),
    Cidr { base: u32, mask: u32 },
    Wildcard(Vec<Octet>),
}

/// A parsed list entry. Keeps its source text for display and removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRule {
    raw: String,
    kind: PatternKind,
}

impl IpRule {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PatternKind::Exact(_) => "exact",
            PatternKind::Cidr { .. } => "cidr",
            PatternKind::Wildcard(_) => "wildcard",
        }
    }

    pub fn matches(&self, addr: &str) -> bool {
        let addr = normalize_addr(addr.trim());
        match &self.kind {
            PatternKind::Exact(expected) => addr == *expected,
            PatternKind::Cidr { base, mask } => match addr.parse::<Ipv4Addr>() {
                Ok(ip) => u32::from(ip) & mask == *base,
                Err(_) => false,
            },
            PatternKind::Wildcard(octets) => {
                let parts: Vec<&str> = addr.split('.').collect();
                if parts.len() != octets.len() {
                    return false;
                }
                octets.iter().zip(parts).all(|(octet, part)| match octet {
                    Octet::Any => true,
                    Octet::Value(v) => part.parse::<u8>().is_ok_and(|p| p == *v),
                })
            }
        }
    }
}

impl FromStr for IpRule {
    type Err = IpPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(IpPatternError::Empty);
        }

        let kind = if let Some((base, prefix)) = raw.split_once('/') {
            let invalid = || IpPatternError::InvalidCidr(raw.to_string());
            let base: Ipv4Addr = base.parse().map_err(|_| invalid())?;
            let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
            if prefix > 32 {
                return Err(invalid());
            }
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            PatternKind::Cidr {
                base: u32::from(base) & mask,
                mask,
            }
        } else if raw.contains('*') {
            let octets = raw
                .split('.')
                .map(|part| match part {
                    "*" => Ok(Octet::Any),
                    other => other
                        .parse::<u8>()
                        .map(Octet::Value)
                        .map_err(|_| IpPatternError::InvalidWildcard(raw.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            if octets.len() != 4 {
                return Err(IpPatternError::InvalidWildcard(raw.to_string()));
            }
            PatternKind::Wildcard(octets)
        } else {
            PatternKind::Exact(normalize_addr(raw))
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Which list an administrative operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

impl FromStr for ListKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whitelist" => Ok(ListKind::Whitelist),
            "blacklist" => Ok(ListKind::Blacklist),
            other => Err(GatewayError::BadRequest(format!("unknown IP list `{}`", other))),
        }
    }
}

/// Which variant of the filter a route uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Standard,
    Strict,
}

/// Parse a list of patterns, reporting the first bad one.
pub fn parse_rules(patterns: &[String]) -> Result<Vec<IpRule>, IpPatternError> {
    patterns.iter().map(|p| p.parse()).collect()
}

pub fn matches_any(rules: &[IpRule], addr: &str) -> bool {
    rules.iter().any(|r| r.matches(addr))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpFilterStatus {
    pub address: String,
    pub enabled: bool,
    pub whitelisted: bool,
    pub blacklisted: bool,
    pub can_bypass: bool,
    pub whitelist_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpFilterSnapshot {
    pub enabled: bool,
    pub admin_bypass: bool,
    pub super_admin_bypass: bool,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

pub struct IpFilter {
    enabled: bool,
    admin_bypass: bool,
    super_admin_bypass: bool,
    whitelist: ArcSwap<Vec<IpRule>>,
    blacklist: ArcSwap<Vec<IpRule>>,
}

impl IpFilter {
    pub fn new(config: &IpFilterConfig) -> Result<Self, IpPatternError> {
        Ok(Self {
            enabled: config.enabled,
            admin_bypass: config.admin_bypass,
            super_admin_bypass: config.super_admin_bypass,
            whitelist: ArcSwap::from_pointee(parse_rules(&config.whitelist)?),
            blacklist: ArcSwap::from_pointee(parse_rules(&config.blacklist)?),
        })
    }

    fn list(&self, kind: ListKind) -> &ArcSwap<Vec<IpRule>> {
        match kind {
            ListKind::Whitelist => &self.whitelist,
            ListKind::Blacklist => &self.blacklist,
        }
    }

    /// Whether the identity skips the filter in the given mode.
    pub fn can_bypass(&self, identity: Option<&Identity>, mode: FilterMode) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        match (identity.role, mode) {
            (Role::SuperAdmin, _) => self.super_admin_bypass,
            (Role::Admin, FilterMode::Standard) => self.admin_bypass,
            _ => false,
        }
    }

    /// True if the filter would run at all for this mode.
    pub fn is_active(&self, mode: FilterMode) -> bool {
        mode == FilterMode::Strict || self.enabled
    }

    /// Decide for a client address. `identity` is only consulted when the
    /// address would otherwise be denied, so callers may pass it lazily.
    pub fn check(
        &self,
        addr: &str,
        mode: FilterMode,
        identity: impl FnOnce() -> Option<Identity>,
    ) -> Result<(), GatewayError> {
        if !self.is_active(mode) {
            return Ok(());
        }

        let denial = self.denial(addr, mode);
        match denial {
            None => Ok(()),
            Some(err) => {
                if self.can_bypass(identity().as_ref(), mode) {
                    tracing::debug!(client = %addr, "IP filter bypassed by role");
                    return Ok(());
                }
                tracing::warn!(client = %addr, code = err.code(), "IP filter denied request");
                Err(err)
            }
        }
    }

    fn denial(&self, addr: &str, mode: FilterMode) -> Option<GatewayError> {
        if matches_any(&self.blacklist.load(), addr) {
            return Some(GatewayError::IpBlacklisted);
        }
        let whitelist = self.whitelist.load();
        if whitelist.is_empty() {
            if mode == FilterMode::Strict {
                return Some(GatewayError::NoWhitelistConfigured);
            }
            return None;
        }
        if !matches_any(&whitelist, addr) {
            return Some(GatewayError::IpNotWhitelisted);
        }
        None
    }

    /// Add a pattern; adding an existing pattern is a no-op.
    pub fn add(&self, kind: ListKind, pattern: &str) -> Result<IpRule, IpPatternError> {
        let rule: IpRule = pattern.parse()?;
        self.list(kind).rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|r| r.raw == rule.raw) {
                next.push(rule.clone());
            }
            next
        });
        tracing::info!(list = ?kind, pattern = %rule, "IP rule added");
        Ok(rule)
    }

    /// Remove a pattern by its text. Returns whether it was present.
    pub fn remove(&self, kind: ListKind, pattern: &str) -> bool {
        let pattern = pattern.trim();
        let previous = self.list(kind).rcu(|current| {
            current
                .iter()
                .filter(|r| r.raw != pattern)
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|r| r.raw == pattern);
        if removed {
            tracing::info!(list = ?kind, pattern = %pattern, "IP rule removed");
        }
        removed
    }

    pub fn clear(&self, kind: ListKind) {
        self.list(kind).store(Arc::new(Vec::new()));
        tracing::info!(list = ?kind, "IP list cleared");
    }

    /// Replace both lists, used by configuration reload.
    pub fn replace(&self, config: &IpFilterConfig) -> Result<(), IpPatternError> {
        let whitelist = parse_rules(&config.whitelist)?;
        let blacklist = parse_rules(&config.blacklist)?;
        self.whitelist.store(Arc::new(whitelist));
        self.blacklist.store(Arc::new(blacklist));
        Ok(())
    }

    pub fn status(&self, addr: &str, identity: Option<&Identity>) -> IpFilterStatus {
        let whitelist = self.whitelist.load();
        IpFilterStatus {
            address: addr.to_string(),
            enabled: self.enabled,
            whitelisted: matches_any(&whitelist, addr),
            blacklisted: matches_any(&self.blacklist.load(), addr),
            can_bypass: self.can_bypass(identity, FilterMode::Standard),
            whitelist_configured: !whitelist.is_empty(),
        }
    }

    pub fn snapshot(&self) -> IpFilterSnapshot {
        let render = |list: &ArcSwap<Vec<IpRule>>| {
            list.load().iter().map(|r| r.raw.clone()).collect::<Vec<_>>()
        };
        IpFilterSnapshot {
            enabled: self.enabled,
            admin_bypass: self.admin_bypass,
            super_admin_bypass: self.super_admin_bypass,
            whitelist: render(&self.whitelist),
            blacklist: render(&self.blacklist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(s: &str) -> IpRule {
        s.parse().unwrap()
    }

    fn filter(whitelist: &[&str], blacklist: &[&str]) -> IpFilter {
        IpFilter::new(&IpFilterConfig {
            enabled: true,
            whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            blacklist: blacklist.iter().map(|s| s.to_string()).collect(),
            admin_bypass: true,
            super_admin_bypass: true,
        })
        .unwrap()
    }

    fn nobody() -> Option<Identity> {
        None
    }

    #[test]
    fn test_cidr_matching() {
        let r = rule("10.0.0.0/24");
        assert_eq!(r.kind_name(), "cidr");
        assert!(r.matches("10.0.0.5"));
        assert!(!r.matches("10.0.1.5"));
        assert!(r.matches("::ffff:10.0.0.200"));
        assert!(!r.matches("fe80::1"));

        assert!(rule("0.0.0.0/0").matches("8.8.8.8"));
        assert!(rule("192.168.1.7/32").matches("192.168.1.7"));
        assert!(!rule("192.168.1.7/32").matches("192.168.1.8"));
    }

    #[test]
    fn test_wildcard_matching() {
        let r = rule("192.168.*.*");
        assert_eq!(r.kind_name(), "wildcard");
        assert!(r.matches("192.168.5.9"));
        assert!(!r.matches("192.167.5.9"));
        assert!(!r.matches("192.168.5"));
    }

    #[test]
    fn test_exact_matching() {
        let r = rule("203.0.113.9");
        assert_eq!(r.kind_name(), "exact");
        assert!(r.matches("203.0.113.9"));
        assert!(!r.matches("203.0.113.90"));
        assert!(rule("::1").matches("::1"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!("".parse::<IpRule>(), Err(IpPatternError::Empty));
        assert!(matches!("10.0.0.0/33".parse::<IpRule>(), Err(IpPatternError::InvalidCidr(_))));
        assert!(matches!("10.0.0/8".parse::<IpRule>(), Err(IpPatternError::InvalidCidr(_))));
        assert!(matches!("10.*.x.1".parse::<IpRule>(), Err(IpPatternError::InvalidWildcard(_))));
        assert!(matches!("10.*".parse::<IpRule>(), Err(IpPatternError::InvalidWildcard(_))));
    }

    #[test]
    fn test_blacklist_beats_whitelist() {
        let f = filter(&["10.0.0.0/8"], &["10.0.0.5"]);
        let err = f.check("10.0.0.5", FilterMode::Standard, nobody).unwrap_err();
        assert_eq!(err.code(), "IP_BLACKLISTED");
        assert!(f.check("10.0.0.6", FilterMode::Standard, nobody).is_ok());
    }

    #[test]
    fn test_whitelist_miss() {
        let f = filter(&["10.0.0.0/8"], &[]);
        let err = f.check("192.168.0.1", FilterMode::Standard, nobody).unwrap_err();
        assert_eq!(err.code(), "IP_NOT_WHITELISTED");
    }

    #[test]
    fn test_empty_lists_allow_everything_in_standard_mode() {
        let f = filter(&[], &[]);
        assert!(f.check("198.51.100.1", FilterMode::Standard, nobody).is_ok());
    }

    #[test]
    fn test_strict_mode_requires_whitelist_and_ignores_enabled_flag() {
        let f = IpFilter::new(&IpFilterConfig {
            enabled: false,
            ..IpFilterConfig::default()
        })
        .unwrap();
        assert!(f.check("1.2.3.4", FilterMode::Standard, nobody).is_ok());
        let err = f.check("1.2.3.4", FilterMode::Strict, nobody).unwrap_err();
        assert_eq!(err.code(), "NO_WHITELIST_CONFIGURED");

        f.add(ListKind::Whitelist, "1.2.3.*").unwrap();
        assert!(f.check("1.2.3.4", FilterMode::Strict, nobody).is_ok());
    }

    #[test]
    fn test_bypass_roles() {
        let f = filter(&[], &["10.0.0.5"]);
        let admin = || Some(Identity::new("a", "e", Role::Admin));
        let root = || Some(Identity::new("r", "e", Role::SuperAdmin));
        let member = || Some(Identity::new("m", "e", Role::Member));

        assert!(f.check("10.0.0.5", FilterMode::Standard, admin).is_ok());
        assert!(f.check("10.0.0.5", FilterMode::Standard, root).is_ok());
        assert!(f.check("10.0.0.5", FilterMode::Standard, member).is_err());

        // Strict variant: only the highest role.
        assert!(f.check("10.0.0.5", FilterMode::Strict, admin).is_err());
        assert!(f.check("10.0.0.5", FilterMode::Strict, root).is_ok());
    }

    #[test]
    fn test_identity_only_resolved_on_denial() {
        let f = filter(&[], &[]);
        let result = f.check("10.0.0.5", FilterMode::Standard, || -> Option<Identity> {
            panic!("identity should not be looked up")
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_admin_operations_take_effect_immediately() {
        let f = filter(&[], &[]);
        f.add(ListKind::Blacklist, "172.16.0.0/12").unwrap();
        f.add(ListKind::Blacklist, "172.16.0.0/12").unwrap();
        assert_eq!(f.snapshot().blacklist, vec!["172.16.0.0/12"]);
        assert!(f.check("172.16.4.4", FilterMode::Standard, nobody).is_err());

        assert!(f.remove(ListKind::Blacklist, "172.16.0.0/12"));
        assert!(!f.remove(ListKind::Blacklist, "172.16.0.0/12"));
        assert!(f.check("172.16.4.4", FilterMode::Standard, nobody).is_ok());

        f.add(ListKind::Whitelist, "10.0.0.1").unwrap();
        f.add(ListKind::Whitelist, "10.0.0.2").unwrap();
        f.clear(ListKind::Whitelist);
        assert!(f.snapshot().whitelist.is_empty());

        assert!(f.add(ListKind::Whitelist, "nonsense/99").is_err());
    }

    #[test]
    fn test_status_report() {
        let f = filter(&["10.0.0.0/8"], &["10.0.0.5"]);
        let status = f.status("10.0.0.5", Some(&Identity::new("m", "e", Role::Member)));
        assert!(status.whitelisted);
        assert!(status.blacklisted);
        assert!(!status.can_bypass);
        assert!(status.whitelist_configured);
    }
}
