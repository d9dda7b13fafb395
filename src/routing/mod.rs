//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (ordered rule lookup)
//!     → matcher.rs (segment matching, `:param` capture)
//!     → Return: RouteMatch (policy, IP mode, sanitize mode, params)
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Compile patterns, methods and predicates
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins (configuration order)

pub mod matcher;
pub mod router;

pub use router::{Route, RouteMatch, Router};
