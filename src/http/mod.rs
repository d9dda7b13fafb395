//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, cross-cutting layers)
//!     → request.rs (request ID, tracing span)
//!     → middleware/ (admission stages)
//!     → admin handlers or the admitted responder
//!     → response.rs (rate limit headers)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{GatewayState, HttpServer};
