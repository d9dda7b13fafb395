//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use pension_gateway::config::GatewayConfig;
use pension_gateway::lifecycle::Shutdown;
use pension_gateway::security::authenticator::Authenticator;
use pension_gateway::security::identity::{Identity, Role};
use pension_gateway::HttpServer;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Defaults with a known secret and no metrics exporter. Request spacing is
/// off so tests can send back-to-back requests; window caps still apply.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.observability.metrics_enabled = false;

    let limits = &mut config.rate_limit;
    let roles = &mut limits.roles;
    let windows = [
        &mut limits.ip,
        &mut limits.user,
        &mut roles.guest,
        &mut roles.member,
        &mut roles.pension_officer,
        &mut roles.admin,
        &mut roles.super_admin,
    ];
    for window in windows {
        *window = window.burst();
    }
    for rule in limits.endpoints.iter_mut().chain(limits.presets.iter_mut()) {
        rule.window = rule.window.burst();
    }
    config
}

/// A running gateway on an ephemeral port. Shuts down on drop.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    authenticator: Authenticator,
    shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let authenticator = Authenticator::new(&config.auth);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let (_, config_updates) = mpsc::unbounded_channel();
        let server = HttpServer::new(config).expect("valid test config");
        let server_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, config_updates, server_shutdown).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .unwrap();

        Self {
            addr,
            client,
            authenticator,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Bearer token for a user of the given role in `org-1`.
    pub fn token(&self, id: &str, role: Role) -> String {
        let identity =
            Identity::new(id, format!("{}@example.org", id), role).with_organization("org-1");
        self.authenticator.issue(&identity).unwrap()
    }

    pub fn get(&self, path: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.client.get(self.url(path));
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub fn post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token)
    }

    /// Send the request target verbatim; reqwest would resolve dot segments
    /// before they reach the gateway. Returns the raw HTTP response.
    pub async fn raw_get(&self, target: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            target, self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Extract the `error.code` field of a rejection body.
pub async fn error_code(res: reqwest::Response) -> String {
    let body: serde_json::Value = res.json().await.unwrap();
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}
