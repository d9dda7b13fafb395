//! Multi-dimensional fixed-window rate limiting.
//!
//! # Stages
//! ```text
//! global (before auth):  preset (by IP) → ip
//! route  (after RBAC):   user → role → endpoint
//! ```
//! Each dimension has its own window. Evaluation stops at the first
//! exhausted bucket, which is reported as the blocking dimension.
//!
//! # Design Decisions
//! - Buckets live behind `RateLimitStore`; the in-memory store updates a
//!   key atomically through the `DashMap` entry lock
//! - Store failures fail open: logged, never surfaced to the caller
//! - Aggregate counters reset lazily once a day

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::schema::{PrefixLimitConfig, RateLimitConfig, WindowConfig};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::security::ip_filter::{matches_any, parse_rules, IpPatternError, IpRule};
use crate::security::identity::{Identity, Role};

const METRICS_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Trailing characters of an unverified credential used as an anonymous key.
/// JWT headers are shared between tokens, so the signature end is used.
const ANON_CREDENTIAL_SUFFIX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Preset,
    Ip,
    User,
    Role,
    Endpoint,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Preset => "preset",
            Dimension::Ip => "ip",
            Dimension::User => "user",
            Dimension::Role => "role",
            Dimension::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota figures rendered into response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window ends.
    pub reset_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a single bucket update or peek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketState {
    pub allowed: bool,
    pub limit: u32,
    pub count: u32,
    pub resets_in: Duration,
    pub retry_after: Option<Duration>,
}

impl BucketState {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    fn info(&self) -> RateLimitInfo {
        RateLimitInfo {
            limit: self.limit,
            remaining: self.remaining(),
            reset_at: Utc::now().timestamp() + ceil_secs(self.resets_in) as i64,
            retry_after_secs: self.retry_after.map(|d| ceil_secs(d).max(1)),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Bucket persistence. Implementations must make `hit` atomic per key.
pub trait RateLimitStore: Send + Sync {
    /// Count a request against the bucket, unless it is exhausted.
    fn hit(&self, key: &str, window: &WindowConfig, now: Instant)
        -> Result<BucketState, StoreError>;

    /// Current state without consuming quota.
    fn peek(&self, key: &str, window: &WindowConfig, now: Instant)
        -> Result<BucketState, StoreError>;

    /// Drop buckets whose window has elapsed. Returns how many were removed.
    fn sweep(&self, now: Instant) -> usize;

    fn len(&self) -> usize;
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    window: Duration,
    count: u32,
    last_accepted: Option<Instant>,
}

impl Bucket {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            window_start: now,
            window,
            count: 0,
            last_accepted: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        self.window = window;
        if self.expired(now) {
            self.window_start = now;
            self.count = 0;
        }
    }

    fn resets_in(&self, now: Instant) -> Duration {
        (self.window_start + self.window).saturating_duration_since(now)
    }

    /// Time until the spacing rule admits another request, if it currently refuses.
    fn spacing_wait(&self, config: &WindowConfig, now: Instant) -> Option<Duration> {
        if !config.spread_evenly || config.max_requests == 0 {
            return None;
        }
        let interval = self.window / config.max_requests;
        let elapsed = now.duration_since(self.last_accepted?);
        (elapsed < interval).then(|| interval - elapsed)
    }

    fn state(&self, config: &WindowConfig, now: Instant, allowed: bool) -> BucketState {
        let retry_after = if allowed {
            None
        } else if self.count >= config.max_requests {
            Some(self.resets_in(now))
        } else {
            self.spacing_wait(config, now)
        };
        BucketState {
            allowed,
            limit: config.max_requests,
            count: self.count,
            resets_in: self.resets_in(now),
            retry_after,
        }
    }
}

/// Process-local bucket store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    buckets: DashMap<String, Bucket>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryStore {
    fn hit(
        &self,
        key: &str,
        config: &WindowConfig,
        now: Instant,
    ) -> Result<BucketState, StoreError> {
        let window = Duration::from_millis(config.window_ms);
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(now, window));

        bucket.roll(now, window);
        let allowed =
            bucket.count < config.max_requests && bucket.spacing_wait(config, now).is_none();
        if allowed {
            bucket.count += 1;
            bucket.last_accepted = Some(now);
        }
        Ok(bucket.state(config, now, allowed))
    }

    fn peek(
        &self,
        key: &str,
        config: &WindowConfig,
        now: Instant,
    ) -> Result<BucketState, StoreError> {
        let window = Duration::from_millis(config.window_ms);
        let state = match self.buckets.get(key) {
            Some(bucket) if !bucket.expired(now) => {
                let allowed = bucket.count < config.max_requests
                    && bucket.spacing_wait(config, now).is_none();
                bucket.state(config, now, allowed)
            }
            _ => Bucket::new(now, window).state(config, now, config.max_requests > 0),
        };
        Ok(state)
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.expired(now));
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Who is being limited.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub addr: &'a str,
    pub identity: Option<&'a Identity>,
    /// Raw credential, used only to key anonymous callers.
    pub credential: Option<&'a str>,
}

impl<'a> Subject<'a> {
    pub fn anonymous(addr: &'a str) -> Self {
        Self {
            addr,
            identity: None,
            credential: None,
        }
    }

    /// Identity id when authenticated, otherwise a low-cardinality anonymous key.
    pub fn user_key(&self) -> String {
        if let Some(identity) = self.identity {
            return format!("user:{}", identity.id);
        }
        match self.credential {
            Some(token) if !token.is_empty() => {
                let start = token.len().saturating_sub(ANON_CREDENTIAL_SUFFIX);
                let suffix = token.get(start..).unwrap_or(token);
                format!("anon:{}", suffix)
            }
            _ => format!("anon:{}", self.addr),
        }
    }

    fn role(&self) -> Role {
        self.identity.map(|i| i.role).unwrap_or(Role::Guest)
    }
}

/// One bucket a request is checked against.
#[derive(Debug, Clone)]
struct Check {
    dimension: Dimension,
    name: Option<String>,
    key: String,
    window: WindowConfig,
}

/// Remaining quota for one dimension, as reported by the status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionStatus {
    pub dimension: Dimension,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub bypassed: bool,
    pub dimensions: Vec<DimensionStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopEntry {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub block_rate: f64,
    pub top_blocked_ips: Vec<TopEntry>,
    pub top_blocked_users: Vec<TopEntry>,
    pub period_start: DateTime<Utc>,
    pub tracked_buckets: usize,
}

#[derive(Debug)]
struct UsageStats {
    started: Instant,
    started_at: DateTime<Utc>,
    total: u64,
    blocked: u64,
    blocked_ips: HashMap<String, u64>,
    blocked_users: HashMap<String, u64>,
}

impl UsageStats {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            started_at: Utc::now(),
            total: 0,
            blocked: 0,
            blocked_ips: HashMap::new(),
            blocked_users: HashMap::new(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started) >= METRICS_PERIOD {
            tracing::info!(
                total = self.total,
                blocked = self.blocked,
                "Resetting daily rate limit metrics"
            );
            *self = UsageStats::new(now);
        }
    }
}

fn top_n(counts: &HashMap<String, u64>, n: usize) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = counts
        .iter()
        .map(|(key, count)| TopEntry {
            key: key.clone(),
            count: *count,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries.truncate(n);
    entries
}

fn first_prefix_match<'c>(
    rules: &'c [PrefixLimitConfig],
    path: &str,
) -> Option<&'c PrefixLimitConfig> {
    rules.iter().find(|r| {
        path.get(..r.prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&r.prefix))
    })
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    bypass: Vec<IpRule>,
    stats: Mutex<UsageStats>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, IpPatternError> {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, IpPatternError> {
        let bypass = parse_rules(&config.bypass_addresses)?;
        Ok(Self {
            config,
            store,
            bypass,
            stats: Mutex::new(UsageStats::new(Instant::now())),
        })
    }

    pub fn is_bypassed_addr(&self, addr: &str) -> bool {
        matches_any(&self.bypass, addr)
    }

    fn bypasses_route_stage(&self, subject: &Subject<'_>) -> bool {
        subject
            .identity
            .is_some_and(|i| self.config.bypass_roles.contains(&i.role))
    }

    fn global_checks(&self, subject: &Subject<'_>, path: &str) -> Vec<Check> {
        let mut checks = Vec::with_capacity(2);
        if let Some(preset) = first_prefix_match(&self.config.presets, path) {
            checks.push(Check {
                dimension: Dimension::Preset,
                name: Some(preset.name.clone()),
                key: format!("preset:{}:{}", preset.name, subject.addr),
                window: preset.window,
            });
        }
        checks.push(Check {
            dimension: Dimension::Ip,
            name: None,
            key: format!("ip:{}", subject.addr),
            window: self.config.ip,
        });
        checks
    }

    fn route_checks(&self, subject: &Subject<'_>, path: &str) -> Vec<Check> {
        let user_key = subject.user_key();
        let role = subject.role();
        let mut checks = vec![
            Check {
                dimension: Dimension::User,
                name: None,
                key: user_key.clone(),
                window: self.config.user,
            },
            Check {
                dimension: Dimension::Role,
                name: Some(role.to_string()),
                key: format!("role:{}:{}", role, user_key),
                window: self.config.roles.for_role(role),
            },
        ];
        if let Some(endpoint) = first_prefix_match(&self.config.endpoints, path) {
            checks.push(Check {
                dimension: Dimension::Endpoint,
                name: Some(endpoint.name.clone()),
                key: format!("endpoint:{}:{}", endpoint.name, user_key),
                window: endpoint.window,
            });
        }
        checks
    }

    /// Preset and IP dimensions. Runs before authentication.
    pub fn check_global(
        &self,
        subject: &Subject<'_>,
        path: &str,
    ) -> Result<Option<RateLimitInfo>, GatewayError> {
        self.check_global_at(subject, path, Instant::now())
    }

    pub fn check_global_at(
        &self,
        subject: &Subject<'_>,
        path: &str,
        now: Instant,
    ) -> Result<Option<RateLimitInfo>, GatewayError> {
        if !self.config.enabled || self.is_bypassed_addr(subject.addr) {
            return Ok(None);
        }
        self.with_stats(now, |stats| stats.total += 1);
        let checks = self.global_checks(subject, path);
        self.evaluate(subject, &checks, now)
    }

    /// User, role and endpoint dimensions. Runs after access control.
    pub fn check_route(
        &self,
        subject: &Subject<'_>,
        path: &str,
    ) -> Result<Option<RateLimitInfo>, GatewayError> {
        self.check_route_at(subject, path, Instant::now())
    }

    pub fn check_route_at(
        &self,
        subject: &Subject<'_>,
        path: &str,
        now: Instant,
    ) -> Result<Option<RateLimitInfo>, GatewayError> {
        if !self.config.enabled
            || self.is_bypassed_addr(subject.addr)
            || self.bypasses_route_stage(subject)
        {
            return Ok(None);
        }
        let checks = self.route_checks(subject, path);
        self.evaluate(subject, &checks, now)
    }

    /// Walk the checks in order. Returns the most constrained allowed bucket.
    fn evaluate(
        &self,
        subject: &Subject<'_>,
        checks: &[Check],
        now: Instant,
    ) -> Result<Option<RateLimitInfo>, GatewayError> {
        let mut tightest: Option<BucketState> = None;

        for check in checks {
            let state = match self.store.hit(&check.key, &check.window, now) {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        dimension = %check.dimension,
                        "Rate limit store failed, allowing request"
                    );
                    return Ok(tightest.map(|s| s.info()));
                }
            };

            if !state.allowed {
                self.record_block(subject, now);
                metrics::record_rate_limited(check.dimension.as_str());
                tracing::warn!(
                    client = %subject.addr,
                    dimension = %check.dimension,
                    name = ?check.name,
                    limit = state.limit,
                    "Rate limit exceeded"
                );
                return Err(GatewayError::RateLimitExceeded {
                    dimension: check.dimension,
                    info: state.info(),
                });
            }

            if tightest.as_ref().map_or(true, |t| state.remaining() < t.remaining()) {
                tightest = Some(state);
            }
        }

        Ok(tightest.map(|s| s.info()))
    }

    fn with_stats<T>(&self, now: Instant, f: impl FnOnce(&mut UsageStats) -> T) -> T {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.roll(now);
        f(&mut stats)
    }

    fn record_block(&self, subject: &Subject<'_>, now: Instant) {
        let user_key = subject.user_key();
        self.with_stats(now, |stats| {
            stats.blocked += 1;
            *stats.blocked_ips.entry(subject.addr.to_string()).or_default() += 1;
            *stats.blocked_users.entry(user_key).or_default() += 1;
        });
    }

    /// Remaining quota for every dimension the request would be checked against.
    pub fn status(&self, subject: &Subject<'_>, path: &str) -> RateLimitStatus {
        self.status_at(subject, path, Instant::now())
    }

    pub fn status_at(&self, subject: &Subject<'_>, path: &str, now: Instant) -> RateLimitStatus {
        let bypassed = self.is_bypassed_addr(subject.addr);
        let mut checks = self.global_checks(subject, path);
        if !self.bypasses_route_stage(subject) {
            checks.extend(self.route_checks(subject, path));
        }

        let dimensions = checks
            .into_iter()
            .filter_map(|check| {
                let state = self.store.peek(&check.key, &check.window, now).ok()?;
                let info = state.info();
                Some(DimensionStatus {
                    dimension: check.dimension,
                    name: check.name,
                    limit: info.limit,
                    remaining: info.remaining,
                    reset_at: info.reset_at,
                    window_ms: check.window.window_ms,
                })
            })
            .collect();

        RateLimitStatus {
            enabled: self.config.enabled,
            bypassed,
            dimensions,
        }
    }

    pub fn metrics(&self) -> RateLimitMetrics {
        self.metrics_at(Instant::now())
    }

    pub fn metrics_at(&self, now: Instant) -> RateLimitMetrics {
        let top = self.config.top_n;
        let tracked_buckets = self.store.len();
        self.with_stats(now, |stats| RateLimitMetrics {
            total_requests: stats.total,
            blocked_requests: stats.blocked,
            block_rate: if stats.total == 0 {
                0.0
            } else {
                stats.blocked as f64 / stats.total as f64
            },
            top_blocked_ips: top_n(&stats.blocked_ips, top),
            top_blocked_users: top_n(&stats.blocked_users, top),
            period_start: stats.started_at,
            tracked_buckets,
        })
    }

    /// Purge buckets whose window has elapsed.
    pub fn sweep(&self) -> usize {
        let removed = self.store.sweep(Instant::now());
        if removed > 0 {
            tracing::debug!(removed, "Swept stale rate limit buckets");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config).unwrap()
    }

    /// Defaults with spacing turned off, so tests can hit a bucket repeatedly
    /// at one instant and exercise the window caps alone.
    fn bursty() -> RateLimitConfig {
        let mut config = RateLimitConfig::default();
        config.ip = config.ip.burst();
        config.user = config.user.burst();
        let roles = &mut config.roles;
        for window in [
            &mut roles.guest,
            &mut roles.member,
            &mut roles.pension_officer,
            &mut roles.admin,
            &mut roles.super_admin,
        ] {
            *window = window.burst();
        }
        config
    }

    fn ip_only(window_ms: u64, max: u32) -> RateLimitConfig {
        RateLimitConfig {
            ip: WindowConfig::new(window_ms, max).burst(),
            presets: Vec::new(),
            ..bursty()
        }
    }

    #[test]
    fn test_eleventh_request_blocked_until_window_elapses() {
        let limiter = limiter(ip_only(60_000, 10));
        let subject = Subject::anonymous("10.0.0.1");
        let start = Instant::now();

        for i in 0..10 {
            let at = start + Duration::from_millis(i * 100);
            assert!(limiter.check_global_at(&subject, "/api/claims", at).is_ok());
        }

        let err = limiter
            .check_global_at(&subject, "/api/claims", start + Duration::from_secs(5))
            .unwrap_err();
        match err {
            GatewayError::RateLimitExceeded { dimension, info } => {
                assert_eq!(dimension, Dimension::Ip);
                assert_eq!(info.limit, 10);
                assert_eq!(info.remaining, 0);
                assert_eq!(info.retry_after_secs, Some(55));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let later = start + Duration::from_millis(60_001);
        assert!(limiter.check_global_at(&subject, "/api/claims", later).is_ok());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(ip_only(60_000, 1));
        let now = Instant::now();
        assert!(limiter.check_global_at(&Subject::anonymous("10.0.0.1"), "/", now).is_ok());
        assert!(limiter.check_global_at(&Subject::anonymous("10.0.0.2"), "/", now).is_ok());
        assert!(limiter.check_global_at(&Subject::anonymous("10.0.0.1"), "/", now).is_err());
    }

    #[test]
    fn test_spread_evenly_spaces_requests() {
        let store = InMemoryStore::new();
        let window = WindowConfig::new(60_000, 3);
        let start = Instant::now();

        assert!(store.hit("k", &window, start).unwrap().allowed);
        let refused = store.hit("k", &window, start + Duration::from_secs(5)).unwrap();
        assert!(!refused.allowed);
        assert_eq!(refused.retry_after, Some(Duration::from_secs(15)));

        assert!(store.hit("k", &window, start + Duration::from_secs(20)).unwrap().allowed);
        assert!(store.hit("k", &window, start + Duration::from_secs(40)).unwrap().allowed);
        assert!(!store.hit("k", &window, start + Duration::from_secs(59)).unwrap().allowed);
    }

    #[test]
    fn test_default_ip_window_spaces_requests() {
        let limiter = limiter(RateLimitConfig::default());
        let subject = Subject::anonymous("10.0.0.3");
        let start = Instant::now();
        // 1000 requests per 15 minutes admits one every 900 ms.
        assert!(limiter.check_global_at(&subject, "/api/claims", start).is_ok());

        match limiter.check_global_at(&subject, "/api/claims", start + Duration::from_millis(1)) {
            Err(GatewayError::RateLimitExceeded { dimension, info }) => {
                assert_eq!(dimension, Dimension::Ip);
                assert_eq!(info.remaining, 999);
                assert_eq!(info.retry_after_secs, Some(1));
            }
            other => panic!("expected spacing block, got {:?}", other),
        }

        let spaced = start + Duration::from_millis(900);
        assert!(limiter.check_global_at(&subject, "/api/claims", spaced).is_ok());
    }

    #[test]
    fn test_concurrent_hits_never_exceed_limit() {
        let store = InMemoryStore::new();
        let window = WindowConfig::new(60_000, 10).burst();
        let now = Instant::now();
        let allowed = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..64 {
                scope.spawn(|| {
                    if store.hit("shared", &window, now).unwrap().allowed {
                        allowed.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst), 10);
        assert_eq!(store.peek("shared", &window, now).unwrap().count, 10);
    }

    #[test]
    fn test_presets_checked_before_ip() {
        let config = RateLimitConfig {
            presets: vec![PrefixLimitConfig {
                name: "login".into(),
                prefix: "/api/auth/login".into(),
                window: WindowConfig::new(60_000, 2).burst(),
            }],
            ..bursty()
        };
        let limiter = limiter(config);
        let subject = Subject::anonymous("10.0.0.9");
        let now = Instant::now();

        assert!(limiter.check_global_at(&subject, "/api/auth/login", now).is_ok());
        assert!(limiter.check_global_at(&subject, "/api/auth/login", now).is_ok());
        match limiter.check_global_at(&subject, "/api/auth/login", now) {
            Err(GatewayError::RateLimitExceeded { dimension, .. }) => {
                assert_eq!(dimension, Dimension::Preset)
            }
            other => panic!("expected preset block, got {:?}", other),
        }
        // Prefixes ignore ASCII case, like route literals.
        assert!(limiter.check_global_at(&subject, "/API/Auth/Login", now).is_err());
        // Other routes only see the IP dimension.
        assert!(limiter.check_global_at(&subject, "/api/claims", now).is_ok());
    }

    #[test]
    fn test_route_stage_blocks_on_first_exhausted_dimension() {
        let config = RateLimitConfig {
            user: WindowConfig::new(60_000, 100).burst(),
            endpoints: vec![PrefixLimitConfig {
                name: "payments".into(),
                prefix: "/api/payments".into(),
                window: WindowConfig::new(60_000, 2).burst(),
            }],
            ..bursty()
        };
        let limiter = limiter(config);
        let identity = Identity::new("u-1", "e", Role::Member);
        let subject = Subject {
            addr: "10.0.0.1",
            identity: Some(&identity),
            credential: None,
        };
        let now = Instant::now();

        let info = limiter
            .check_route_at(&subject, "/api/payments/1", now)
            .unwrap()
            .unwrap();
        assert_eq!(info.limit, 2);
        assert_eq!(info.remaining, 1);

        limiter.check_route_at(&subject, "/api/payments/1", now).unwrap();
        match limiter.check_route_at(&subject, "/api/payments/1", now) {
            Err(GatewayError::RateLimitExceeded { dimension, .. }) => {
                assert_eq!(dimension, Dimension::Endpoint)
            }
            other => panic!("expected endpoint block, got {:?}", other),
        }
        assert!(limiter.check_route_at(&subject, "/api/claims", now).is_ok());
    }

    #[test]
    fn test_role_quotas_and_bypass_roles() {
        let mut config = bursty();
        config.roles.member = WindowConfig::new(60_000, 1);
        config.roles.super_admin = WindowConfig::new(60_000, 1);
        let limiter = limiter(config);
        let now = Instant::now();

        let member = Identity::new("m", "e", Role::Member);
        let subject = Subject {
            addr: "10.0.0.1",
            identity: Some(&member),
            credential: None,
        };
        assert!(limiter.check_route_at(&subject, "/api/claims", now).is_ok());
        assert!(matches!(
            limiter.check_route_at(&subject, "/api/claims", now),
            Err(GatewayError::RateLimitExceeded {
                dimension: Dimension::Role,
                ..
            })
        ));

        let root = Identity::new("r", "e", Role::SuperAdmin);
        let subject = Subject {
            addr: "10.0.0.1",
            identity: Some(&root),
            credential: None,
        };
        for _ in 0..5 {
            assert!(limiter.check_route_at(&subject, "/api/claims", now).is_ok());
        }
    }

    #[test]
    fn test_bypass_addresses_skip_limiting() {
        let config = RateLimitConfig {
            bypass_addresses: vec!["10.1.0.0/16".into()],
            ..ip_only(60_000, 1)
        };
        let limiter = limiter(config);
        let now = Instant::now();
        let subject = Subject::anonymous("10.1.2.3");
        for _ in 0..5 {
            assert!(limiter.check_global_at(&subject, "/", now).is_ok());
        }
        assert_eq!(limiter.metrics_at(now).total_requests, 0);
    }

    struct BrokenStore;

    impl RateLimitStore for BrokenStore {
        fn hit(&self, _: &str, _: &WindowConfig, _: Instant) -> Result<BucketState, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn peek(&self, _: &str, _: &WindowConfig, _: Instant) -> Result<BucketState, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn sweep(&self, _: Instant) -> usize {
            0
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_store_failure_fails_open() {
        let limiter =
            RateLimiter::with_store(ip_only(60_000, 0), Arc::new(BrokenStore)).unwrap();
        let subject = Subject::anonymous("10.0.0.1");
        for _ in 0..3 {
            assert!(limiter.check_global(&subject, "/").unwrap().is_none());
        }
        assert!(limiter.status(&subject, "/").dimensions.is_empty());
    }

    #[test]
    fn test_poisoned_stats_still_admit() {
        let limiter = limiter(ip_only(60_000, 5));
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            limiter.with_stats::<()>(Instant::now(), |_| panic!("stats writer crashed"));
        }));
        assert!(poisoned.is_err());
        assert!(limiter.stats.is_poisoned());

        let subject = Subject::anonymous("10.0.0.1");
        assert!(limiter.check_global(&subject, "/").unwrap().is_some());
        assert_eq!(limiter.metrics().total_requests, 1);
    }

    #[test]
    fn test_status_does_not_consume() {
        let limiter = limiter(ip_only(60_000, 5));
        let subject = Subject::anonymous("10.0.0.1");
        let now = Instant::now();
        limiter.check_global_at(&subject, "/api/claims", now).unwrap();

        for _ in 0..3 {
            let status = limiter.status_at(&subject, "/api/claims", now);
            let ip = status
                .dimensions
                .iter()
                .find(|d| d.dimension == Dimension::Ip)
                .unwrap();
            assert_eq!(ip.remaining, 4);
        }
    }

    #[test]
    fn test_metrics_and_daily_reset() {
        let limiter = limiter(ip_only(60_000, 1));
        let now = Instant::now();
        for addr in ["10.0.0.1", "10.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.2"] {
            let _ = limiter.check_global_at(&Subject::anonymous(addr), "/", now);
        }

        let snapshot = limiter.metrics_at(now);
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.blocked_requests, 3);
        assert!((snapshot.block_rate - 0.6).abs() < f64::EPSILON);
        assert_eq!(
            snapshot.top_blocked_ips[0],
            TopEntry {
                key: "10.0.0.1".into(),
                count: 2
            }
        );

        let tomorrow = now + METRICS_PERIOD + Duration::from_secs(1);
        let snapshot = limiter.metrics_at(tomorrow);
        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.top_blocked_ips.is_empty());
    }

    #[test]
    fn test_sweep_removes_elapsed_buckets() {
        let store = InMemoryStore::new();
        let short = WindowConfig::new(1_000, 5);
        let long = WindowConfig::new(60_000, 5);
        let start = Instant::now();
        store.hit("a", &short, start).unwrap();
        store.hit("b", &long, start).unwrap();

        assert_eq!(store.sweep(start + Duration::from_secs(2)), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_anonymous_user_key() {
        let subject = Subject {
            addr: "10.0.0.1",
            identity: None,
            credential: Some("eyJhbGciOiJIUzI1NiJ9.payload.c2lnbmF0dXJlLWJ5dGVz"),
        };
        assert_eq!(subject.user_key(), "anon:bmF0dXJlLWJ5dGVz");
        assert_eq!(Subject::anonymous("10.0.0.1").user_key(), "anon:10.0.0.1");
    }
}
