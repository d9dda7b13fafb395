//! End-to-end tests of the admission pipeline over real sockets.

use axum::http::StatusCode;
use serde_json::{json, Value};

use pension_gateway::config::schema::WindowConfig;
use pension_gateway::security::identity::Role;

mod common;

use common::{error_code, test_config, TestGateway};

#[tokio::test]
async fn test_missing_token_rejected() {
    let gateway = TestGateway::start(test_config()).await;

    let res = gateway.get("/api/claims/list", None).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(error_code(res).await, "NO_TOKEN");
}

#[tokio::test]
async fn test_public_route_needs_no_token() {
    let gateway = TestGateway::start(test_config()).await;

    let res = gateway.get("/health", None).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_member_denied_admin_route() {
    let gateway = TestGateway::start(test_config()).await;
    let token = gateway.token("u-member", Role::Member);

    let res = gateway.get("/api/admin/settings", Some(&token)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "INSUFFICIENT_ROLE");
}

#[tokio::test]
async fn test_case_variant_admin_path_still_denied() {
    let gateway = TestGateway::start(test_config()).await;
    let token = gateway.token("u-member", Role::Member);

    for path in ["/API/ADMIN/settings", "/Api/Admin/settings"] {
        let res = gateway.get(path, Some(&token)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "{}", path);
        assert_eq!(error_code(res).await, "INSUFFICIENT_ROLE");
    }
}

#[tokio::test]
async fn test_dot_segments_refused_before_public_check() {
    let gateway = TestGateway::start(test_config()).await;

    for target in [
        "/health/../api/admin/settings",
        "/health/%2e%2e/api/admin/settings",
        "/api/public/./../admin/settings",
    ] {
        let response = gateway.raw_get(target).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}: {}", target, response);
        assert!(response.contains("BAD_REQUEST"), "{}", target);
        assert!(!response.contains("admitted"), "{}", target);
    }

    let res = gateway.get("/health//api/admin/settings", None).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "BAD_REQUEST");
}

#[tokio::test]
async fn test_public_prefix_needs_segment_boundary() {
    let gateway = TestGateway::start(test_config()).await;

    let res = gateway.get("/healthz-internal/dump", None).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "NO_TOKEN");
}

#[tokio::test]
async fn test_member_admitted_with_trusted_headers() {
    let gateway = TestGateway::start(test_config()).await;
    let token = gateway.token("u-member", Role::Member);

    let res = gateway
        .get("/api/claims/list?organizationId=org-1", Some(&token))
        .header("x-user-id", "root")
        .header("x-user-role", "super-admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-ratelimit-remaining"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "admitted");
    assert_eq!(body["route"], "claims");
    assert_eq!(body["forwardedHeaders"]["x-user-id"], "u-member");
    assert_eq!(body["forwardedHeaders"]["x-user-role"], "member");
    assert_eq!(body["forwardedHeaders"]["x-organization-id"], "org-1");
}

#[tokio::test]
async fn test_spoofed_identity_headers_dropped_on_public_route() {
    let gateway = TestGateway::start(test_config()).await;

    let res = gateway
        .get("/api/public/info", None)
        .header("x-user-id", "root")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["forwardedHeaders"].get("x-user-id").is_none());
}

#[tokio::test]
async fn test_cross_organization_denied() {
    let gateway = TestGateway::start(test_config()).await;
    let token = gateway.token("u-member", Role::Member);

    let res = gateway
        .get("/api/claims/list?organizationId=org-2", Some(&token))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "ORG_ACCESS_DENIED");
}

#[tokio::test]
async fn test_super_admin_bypasses_blacklist() {
    let mut config = test_config();
    config.ip_filter.blacklist = vec!["203.0.113.*".to_string()];
    let gateway = TestGateway::start(config).await;

    let member = gateway.token("u-member", Role::Member);
    let res = gateway
        .get("/api/voting/polls", Some(&member))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "IP_BLACKLISTED");

    let root = gateway.token("u-root", Role::SuperAdmin);
    let res = gateway
        .get("/api/voting/polls", Some(&root))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ip_limit_reports_headers() {
    let mut config = test_config();
    config.rate_limit.ip = WindowConfig::new(60_000, 2).burst();
    let gateway = TestGateway::start(config).await;

    for expected in ["1", "0"] {
        let res = gateway.get("/health", None).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        assert_eq!(res.headers()["x-ratelimit-remaining"], expected);
    }

    let res = gateway.get("/health", None).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    assert!(res.headers().contains_key("retry-after"));
    assert_eq!(error_code(res).await, "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_super_admin_skips_role_caps() {
    let mut config = test_config();
    config.rate_limit.roles.member = WindowConfig::new(60_000, 1);
    config.rate_limit.roles.super_admin = WindowConfig::new(60_000, 1);
    let gateway = TestGateway::start(config).await;

    let member = gateway.token("u-member", Role::Member);
    let first = gateway.get("/api/voting/polls", Some(&member)).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = gateway.get("/api/voting/polls", Some(&member)).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let root = gateway.token("u-root", Role::SuperAdmin);
    for _ in 0..3 {
        let res = gateway.get("/api/voting/polls", Some(&root)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_strict_sanitizer_rejects_injection() {
    let mut config = test_config();
    config.sanitizer.strict = true;
    let gateway = TestGateway::start(config).await;
    let token = gateway.token("u-member", Role::Member);

    let res = gateway
        .post("/api/voting/ballots", &token)
        .json(&json!({ "choice": "yes'; DROP TABLE ballots; --" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "SANITIZATION_ERROR");

    let res = gateway
        .post("/api/voting/ballots", &token)
        .json(&json!({ "choice": "yes" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sanitizer_dry_run_excises_script() {
    let gateway = TestGateway::start(test_config()).await;
    let admin = gateway.token("u-admin", Role::Admin);

    let res = gateway
        .post("/api/sanitizer/test", &admin)
        .json(&json!({ "field": "comment", "value": "<script>alert(1)</script>hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["sanitized"], "hello");
    assert_eq!(body["modified"], true);
}

#[tokio::test]
async fn test_audit_log_newest_first() {
    let gateway = TestGateway::start(test_config()).await;
    let root = gateway.token("u-root", Role::SuperAdmin);

    for path in ["/api/voting/one", "/api/voting/two"] {
        let res = gateway.get(path, Some(&root)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = gateway.get("/api/rbac/audit?limit=3", Some(&root)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: Value = res.json().await.unwrap();
    let resources: Vec<&str> = page["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["resource"].as_str().unwrap())
        .collect();
    assert_eq!(resources, ["/api/rbac/audit", "/api/voting/two", "/api/voting/one"]);
    assert_eq!(page["total"], 3);
}

#[tokio::test]
async fn test_runtime_blacklist_applies_to_next_request() {
    let gateway = TestGateway::start(test_config()).await;
    let root = gateway.token("u-root", Role::SuperAdmin);
    let member = gateway.token("u-member", Role::Member);

    let res = gateway
        .post("/api/ip-filter/blacklist", &root)
        .json(&json!({ "pattern": "198.51.100.0/24" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["kind"], "cidr");

    let res = gateway
        .get("/api/voting/polls", Some(&member))
        .header("x-forwarded-for", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(error_code(res).await, "IP_BLACKLISTED");

    let res = gateway
        .post("/api/ip-filter/blacklist", &root)
        .json(&json!({ "pattern": "10.0.0.0/40" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "INVALID_IP_PATTERN");
}

#[tokio::test]
async fn test_strict_ip_route_without_whitelist() {
    let gateway = TestGateway::start(test_config()).await;
    let admin = gateway.token("u-admin", Role::Admin);

    let res = gateway.get("/api/ip-filter/config", Some(&admin)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "NO_WHITELIST_CONFIGURED");
}
