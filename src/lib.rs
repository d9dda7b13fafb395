//! Pension portal API gateway: request admission library.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::{GatewayState, HttpServer};
pub use lifecycle::Shutdown;
