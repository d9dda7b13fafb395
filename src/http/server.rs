//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared gateway state from configuration
//! - Create Axum Router with admin handlers and the admitted fallback
//! - Wire up the admission pipeline and cross-cutting layers
//! - Apply configuration reloads and sweep stale rate limit buckets
//! - Serve until shutdown

use axum::{
    extract::{OriginalUri, Request},
    http::{header, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    Extension, Json, Router,
};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::schema::GatewayConfig;
use crate::error::GatewayError;
use crate::http::middleware::{
    access_control::access_control,
    authenticate::authenticate,
    context::{observe, prepare},
    ip_filter::ip_filter,
    rate_limit::{global_rate_limit, route_rate_limit},
    sanitize::sanitize,
};
use crate::http::request::{
    make_request_span, propagate_request_id_layer, request_id, set_request_id_layer,
};
use crate::routing::router::RouteError;
use crate::routing::{RouteMatch, Router as RouteTable};
use crate::security::audit::AuditLog;
use crate::security::authenticator::Authenticator;
use crate::security::headers::TRUSTED_IDENTITY_HEADERS;
use crate::security::identity::Identity;
use crate::security::ip_filter::{IpFilter, IpPatternError};
use crate::security::rate_limit::RateLimiter;
use crate::security::rbac::AccessController;
use crate::security::sanitizer::{Sanitizer, SanitizerSetupError};

/// Errors raised while building the gateway state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("IP filter: {0}")]
    IpFilter(IpPatternError),
    #[error("rate limit bypass list: {0}")]
    RateLimit(IpPatternError),
    #[error(transparent)]
    Sanitizer(#[from] SanitizerSetupError),
}

/// Shared stage state, injected into every middleware and handler.
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<RouteTable>,
    pub authenticator: Arc<Authenticator>,
    pub access: AccessController,
    pub rate_limiter: Arc<RateLimiter>,
    pub ip_filter: Arc<IpFilter>,
    pub sanitizer: Arc<Sanitizer>,
    pub max_body_size: usize,
}

impl GatewayState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, StateError> {
        Ok(Self {
            router: Arc::new(RouteTable::new(&config.routes)?),
            authenticator: Arc::new(Authenticator::new(&config.auth)),
            access: AccessController::new(Arc::new(AuditLog::new())),
            rate_limiter: Arc::new(
                RateLimiter::new(config.rate_limit.clone()).map_err(StateError::RateLimit)?,
            ),
            ip_filter: Arc::new(IpFilter::new(&config.ip_filter).map_err(StateError::IpFilter)?),
            sanitizer: Arc::new(Sanitizer::new(&config.sanitizer)?),
            max_body_size: config.security.max_body_size,
        })
    }

    /// Swap in the runtime-mutable parts of a reloaded configuration.
    pub fn apply_reload(&self, config: &GatewayConfig) {
        if let Err(e) = self.ip_filter.replace(&config.ip_filter) {
            tracing::error!(error = %e, "Reload rejected IP lists");
        }
        if let Err(e) = self.sanitizer.replace(&config.sanitizer) {
            tracing::error!(error = %e, "Reload rejected sanitizer settings");
        }
        tracing::info!("Configuration reloaded");
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: GatewayState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, StateError> {
        let state = GatewayState::from_config(&config)?;
        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            state,
            config,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: GatewayState) -> Router {
        // Stages run top to bottom.
        let pipeline = ServiceBuilder::new()
            .layer(middleware::from_fn(observe))
            .layer(middleware::from_fn_with_state(state.clone(), prepare))
            .layer(middleware::from_fn_with_state(state.clone(), ip_filter))
            .layer(middleware::from_fn_with_state(state.clone(), sanitize))
            .layer(middleware::from_fn_with_state(state.clone(), global_rate_limit))
            .layer(middleware::from_fn_with_state(state.clone(), authenticate))
            .layer(middleware::from_fn_with_state(state.clone(), access_control))
            .layer(middleware::from_fn_with_state(state.clone(), route_rate_limit));

        let mut router = admin::routes()
            .fallback(admitted)
            .layer(pipeline)
            .with_state(state);

        if config.security.enable_headers {
            router = router
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.listener.request_timeout_secs,
                ))),
        )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.state.router.len(), "HTTP server starting");

        let reload_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                reload_state.apply_reload(&config);
            }
        });

        let sweeper = tokio::spawn(sweep_buckets(
            self.state.rate_limiter.clone(),
            Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1)),
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        sweeper.abort();
        let summary = self.state.rate_limiter.metrics();
        tracing::info!(
            total_requests = summary.total_requests,
            blocked_requests = summary.blocked_requests,
            audit_entries = self.state.access.audit_log().len(),
            "HTTP server stopped"
        );
        Ok(())
    }
}

async fn sweep_buckets(
    limiter: Arc<RateLimiter>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                limiter.sweep();
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Bucket sweeper stopped");
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    GatewayError::Internal(format!("handler panicked: {}", detail)).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Admitted {
    status: &'static str,
    request_id: String,
    method: String,
    path: String,
    route: String,
    user_id: Option<String>,
    /// Trusted identity headers as they would be forwarded downstream.
    forwarded_headers: BTreeMap<String, String>,
}

/// Terminal handler for requests that passed every stage.
async fn admitted(
    method: Method,
    OriginalUri(uri): OriginalUri,
    identity: Option<Extension<Identity>>,
    route: Option<Extension<RouteMatch>>,
    request: Request,
) -> Json<Admitted> {
    let headers = request.headers();
    let forwarded_headers = TRUSTED_IDENTITY_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Json(Admitted {
        status: "admitted",
        request_id: request_id(headers).to_string(),
        method: method.to_string(),
        path: uri.path().to_string(),
        route: route.map_or_else(|| "unmatched".to_string(), |Extension(r)| r.name().to_string()),
        user_id: identity.map(|Extension(i)| i.id),
        forwarded_headers,
    })
}
