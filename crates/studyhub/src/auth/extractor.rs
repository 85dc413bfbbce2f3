//! Bearer token extractor

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::verifier::{bearer_token, CallerIdentity};
use crate::error::Error;
use crate::server::state::AppState;

/// Authenticated caller. Rejects the request before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub CallerIdentity);

impl AuthUser {
    pub fn uid(&self) -> &str {
        &self.0.uid
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .map(|value| value.to_str().unwrap_or_default());
        let token = bearer_token(header)?;

        let verifier = state.verifier();
        match verifier.verify(token).await {
            Ok(identity) => Ok(AuthUser(identity)),
            Err(e) => {
                tracing::debug!("{} verifier rejected token: {}", verifier.name(), e);
                Err(e.into())
            }
        }
    }
}
