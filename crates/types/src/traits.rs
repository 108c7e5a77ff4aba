//! Async traits shared across all refresh-flow crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `refresh-flow-types`, not on each other.

use crate::{ExchangeContext, RefreshTokenSession, TokenResponse};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use crate::error::Result;

/// Durable, TTL-bound storage for refresh-token sessions.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist `session` under `token`, replacing any previous entry and
    /// restarting its lifetime.
    async fn create(&self, token: &str, session: &RefreshTokenSession) -> Result<()>;

    /// Load the session stored under `token`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::OAuthError::InvalidGrant`] when the entry is
    /// absent, expired or deleted.
    async fn get(&self, token: &str) -> Result<RefreshTokenSession>;

    /// Remove the entry for `token`. A missing entry is not an error.
    async fn delete(&self, token: &str) -> Result<()>;

    /// Remove refresh tokens issued by the given request.
    async fn delete_by_request_id(&self, request_id: &str) -> Result<()>;
}

/// Storage for access-token sessions (introspection state).
#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    /// Record the session behind an issued access token.
    async fn create(&self, token: &str, session: &RefreshTokenSession) -> Result<()>;

    /// Load the session behind `token`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::OAuthError::InvalidGrant`] when nothing is stored.
    async fn get(&self, token: &str) -> Result<RefreshTokenSession>;

    /// Forget `token`. A missing entry is not an error.
    async fn delete(&self, token: &str) -> Result<()>;

    /// Revoke every access token issued by the given request.
    async fn delete_by_request_id(&self, request_id: &str) -> Result<()>;
}

/// One participant of the two-phase exchange.
///
/// Every handler's [`update_session`](Self::update_session) runs before any
/// handler's [`handle_access_request`](Self::handle_access_request).
#[async_trait]
pub trait ExchangeHandler: Send + Sync {
    /// Validate the request and mutate the session.
    async fn update_session(&self, ctx: &mut ExchangeContext) -> Result<()>;

    /// Issue tokens into the response accumulator.
    async fn handle_access_request(
        &self,
        ctx: &ExchangeContext,
        response: &mut TokenResponse,
    ) -> Result<()>;
}

/// Generates and validates opaque refresh tokens.
pub trait RefreshTokenStrategy: Send + Sync {
    /// Create a new refresh token value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RefreshError::Signing`] if the token cannot be produced.
    fn generate(&self) -> Result<String>;

    /// Check that `token` was produced by this strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OAuthError::InvalidGrant`] for foreign or malformed tokens.
    fn validate(&self, token: &str) -> Result<()>;
}

/// Signs a claim set into a compact token (access or ID token).
pub trait TokenSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::RefreshError::Signing`] if signing fails.
    fn sign(&self, claims: &Map<String, Value>) -> Result<String>;
}
