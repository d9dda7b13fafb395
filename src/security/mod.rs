//! Security subsystem: the request-admission stages and their state.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs     (resolve client address, strip identity headers)
//!     → ip_filter.rs   (allow/deny lists)
//!     → sanitizer.rs   (clean or reject payload)
//!     → rate_limit.rs  (preset + IP dimensions)
//!     → authenticator.rs (bearer token → Identity)
//!     → rbac.rs        (route policy, audit.rs records the decision)
//!     → rate_limit.rs  (user, role, endpoint dimensions)
//!     → Admitted
//! ```
//!
//! # Design Decisions
//! - Fail closed on authentication and authorization
//! - Fail open on rate limiter infrastructure errors
//! - No trust in client-supplied identity headers

pub mod audit;
pub mod authenticator;
pub mod headers;
pub mod identity;
pub mod ip_filter;
pub mod payload;
pub mod rate_limit;
pub mod rbac;
pub mod sanitizer;
