//! Bearer token authentication.
//!
//! # Responsibilities
//! - Skip public route prefixes
//! - Extract the bearer credential
//! - Verify signature, expiry and issuer
//! - Build the request `Identity`
//!
//! # Design Decisions
//! - HS256 JWTs; `exp` and `iss` are mandatory claims
//! - Fail closed: any verification problem is a terminal error
//! - `identify` offers a non-failing lookup for stages that run earlier

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::config::schema::AuthConfig;
use crate::error::GatewayError;
use crate::security::identity::{Identity, Permission, Role};

/// Token claims. The user id lives in `id`, with `userId` and `sub` as fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub role: String,

    #[serde(default, rename = "organizationId", skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    pub iss: String,

    pub exp: i64,

    #[serde(default)]
    pub iat: i64,
}

impl Claims {
    fn into_identity(self) -> Result<Identity, GatewayError> {
        let id = self
            .id
            .or(self.user_id)
            .or(self.sub)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::ValidationFailed("token carries no user id".into()))?;

        let role: Role = self
            .role
            .parse()
            .map_err(|e| GatewayError::ValidationFailed(format!("{}", e)))?;

        let permissions = self.permissions.iter().filter_map(|p| match p.parse::<Permission>() {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unrecognized permission claim");
                None
            }
        });

        let mut identity = Identity::new(id, self.email, role).with_permissions(permissions);
        identity.organization_id = self.organization_id.filter(|o| !o.is_empty());
        Ok(identity)
    }
}

/// Verifies bearer tokens and mints them for dev tooling.
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    token_ttl: Duration,
    public_prefixes: Vec<String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = config.leeway_secs;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            token_ttl: Duration::seconds(config.token_ttl_secs as i64),
            public_prefixes: config.public_prefixes.clone(),
        }
    }

    /// True if the path skips authentication. Prefixes match whole segments:
    /// `/health` covers `/health/live` but not `/healthz`.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Public routes yield `Ok(None)`; everything else needs a valid token.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        path: &str,
    ) -> Result<Option<Identity>, GatewayError> {
        if self.is_public(path) {
            return Ok(None);
        }
        let token = bearer_token(headers)?;
        self.verify(token).map(Some)
    }

    /// Verified identity if the request carries a valid token, without failing.
    pub fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        let token = bearer_token(headers).ok()?;
        self.verify(token).ok()
    }

    pub fn verify(&self, token: &str) -> Result<Identity, GatewayError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => GatewayError::InvalidToken,
                _ => GatewayError::ValidationFailed(e.to_string()),
            })?;
        data.claims.into_identity()
    }

    /// Mint a token for the identity using the configured lifetime.
    pub fn issue(&self, identity: &Identity) -> Result<String, GatewayError> {
        self.issue_with_ttl(identity, self.token_ttl)
    }

    pub fn issue_with_ttl(
        &self,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<String, GatewayError> {
        let now = Utc::now();
        let claims = Claims {
            id: Some(identity.id.clone()),
            email: identity.email.clone(),
            role: identity.role.to_string(),
            organization_id: identity.organization_id.clone(),
            permissions: identity.permissions.iter().map(|p| p.to_string()).collect(),
            iss: self.issuer.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            ..Claims::default()
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, GatewayError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("token signing failed: {}", e)))
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(GatewayError::NoToken)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(GatewayError::NoToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GatewayError::NoToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(GatewayError::NoToken);
    }
    Ok(token)
}
