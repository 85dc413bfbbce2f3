//! Identity verifier trait and implementations

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AuthConfig, Environment, StaticIdentity};

/// Error code the identity provider uses for expired tokens
pub const EXPIRED_TOKEN_CODE: &str = "auth/id-token-expired";

/// Verified caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<&StaticIdentity> for CallerIdentity {
    fn from(identity: &StaticIdentity) -> Self {
        Self {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
        }
    }
}

/// Authentication failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthorized: No token provided.")]
    Missing,

    #[error("Unauthorized: Malformed token.")]
    Malformed,

    #[error("Unauthorized: Token expired.")]
    Expired,

    #[error("Unauthorized: Invalid token. {0}")]
    Invalid(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Missing | AuthError::Malformed | AuthError::Expired => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Invalid(_) => StatusCode::FORBIDDEN,
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing_token",
            AuthError::Malformed => "malformed_token",
            AuthError::Expired => "token_expired",
            AuthError::Invalid(_) => "invalid_token",
            AuthError::Unavailable(_) => "auth_unavailable",
        }
    }
}

/// Trait for bearer token verification
///
/// Implementations:
/// - `RemoteIdentityVerifier`: identity provider verification endpoint
/// - `StaticTokenVerifier`: fixed token table
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a bearer token
    async fn verify(&self, token: &str) -> Result<CallerIdentity, AuthError>;

    /// Get verifier name for logging
    fn name(&self) -> &str;
}

/// Accepts only tokens listed in configuration
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, CallerIdentity>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: &HashMap<String, StaticIdentity>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, identity)| (token.clone(), CallerIdentity::from(identity)))
                .collect(),
        }
    }

    /// Add a token, mostly for tests
    pub fn with_token(mut self, token: impl Into<String>, uid: impl Into<String>) -> Self {
        self.tokens.insert(
            token.into(),
            CallerIdentity {
                uid: uid.into(),
                email: None,
                name: None,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::Invalid("unknown token".to_string()))
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct VerifyErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Delegates verification to the identity provider over HTTP
pub struct RemoteIdentityVerifier {
    client: Client,
    verify_url: String,
    fallback: StaticTokenVerifier,
}

impl RemoteIdentityVerifier {
    pub fn new(verify_url: impl Into<String>, timeout: Duration, fallback: StaticTokenVerifier) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            verify_url: verify_url.into(),
            fallback,
        })
    }
}

#[async_trait]
impl IdentityVerifier for RemoteIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        if let Ok(identity) = self.fallback.verify(token).await {
            return Ok(identity);
        }

        let response = self
            .client
            .post(&self.verify_url)
            .json(&VerifyRequest { id_token: token })
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<CallerIdentity>()
                .await
                .map_err(|e| AuthError::Unavailable(format!("Malformed verification response: {}", e)));
        }

        if status.is_server_error() {
            return Err(AuthError::Unavailable(format!("verification endpoint returned {}", status)));
        }

        let body: Option<VerifyErrorBody> = response.json().await.ok();
        let code = body.as_ref().and_then(|b| b.code.clone());
        if code.as_deref() == Some(EXPIRED_TOKEN_CODE) {
            return Err(AuthError::Expired);
        }

        let message = body
            .and_then(|b| b.message.or(b.code))
            .unwrap_or_else(|| status.to_string());
        Err(AuthError::Invalid(message))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Build the verifier described by configuration.
/// Static tokens are honored only in development.
pub fn verifier_from_config(
    config: &AuthConfig,
    environment: Environment,
) -> Result<Box<dyn IdentityVerifier>, AuthError> {
    let fixed = if environment == Environment::Development {
        StaticTokenVerifier::new(&config.static_tokens)
    } else {
        if !config.static_tokens.is_empty() {
            tracing::warn!(
                "Ignoring {} static token(s) outside development",
                config.static_tokens.len()
            );
        }
        StaticTokenVerifier::default()
    };
    match &config.verify_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(10));
            Ok(Box::new(RemoteIdentityVerifier::new(url.clone(), timeout, fixed)?))
        }
        None => {
            if fixed.tokens.is_empty() {
                tracing::warn!("No identity provider configured; every authenticated route will reject callers");
            }
            Ok(Box::new(fixed))
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::Missing)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), Err(AuthError::Malformed));
        assert_eq!(bearer_token(Some("Bearer ")), Err(AuthError::Malformed));
        assert_eq!(bearer_token(None), Err(AuthError::Missing));
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::default().with_token("t1", "researcher-1");
        assert_eq!(verifier.verify("t1").await.unwrap().uid, "researcher-1");
        assert!(matches!(verifier.verify("t2").await, Err(AuthError::Invalid(_))));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Missing.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Expired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Invalid("x".into()).status_code(), StatusCode::FORBIDDEN);
    }

    fn config_with_dev_token() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.static_tokens.insert(
            "dev".into(),
            StaticIdentity {
                uid: "u".into(),
                email: None,
                name: None,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_config_without_url_uses_static_tokens() {
        let config = config_with_dev_token();
        let verifier = verifier_from_config(&config, Environment::Development).unwrap();
        assert_eq!(verifier.name(), "static");
        assert_eq!(verifier.verify("dev").await.unwrap().uid, "u");

        let verifier = verifier_from_config(&config, Environment::Production).unwrap();
        assert!(matches!(verifier.verify("dev").await, Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_static_tokens_do_not_bypass_provider_in_production() {
        let mut config = config_with_dev_token();
        // Nothing listens on the discard port, so the provider is unreachable
        config.verify_url = Some("http://127.0.0.1:9/verify".into());
        config.timeout_secs = Some(2);

        let verifier = verifier_from_config(&config, Environment::Development).unwrap();
        assert_eq!(verifier.name(), "remote");
        assert_eq!(verifier.verify("dev").await.unwrap().uid, "u");

        let verifier = verifier_from_config(&config, Environment::Production).unwrap();
        assert!(matches!(verifier.verify("dev").await, Err(AuthError::Unavailable(_))));
    }
}
