//! Caller authentication against the identity provider

mod extractor;
mod verifier;

pub use extractor::AuthUser;
pub use verifier::{
    bearer_token, verifier_from_config, AuthError, CallerIdentity, IdentityVerifier,
    RemoteIdentityVerifier, StaticTokenVerifier, EXPIRED_TOKEN_CODE,
};
