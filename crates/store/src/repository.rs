//! Refresh-token store over any [`KeyValueBackend`].

use crate::backend::KeyValueBackend;
use crate::form::PersistenceForm;
use async_trait::async_trait;
use refresh_flow_types::{
    OAuthError, RefreshError, RefreshTokenSession, RefreshTokenStore, traits::Result,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Stores each session as a [`PersistenceForm`] keyed by the raw token, with
/// an expiry equal to the configured refresh-token lifespan.
#[derive(Clone)]
pub struct RefreshTokenRepository {
    backend: Arc<dyn KeyValueBackend>,
    ttl_secs: u64,
}

impl RefreshTokenRepository {
    /// The lifespan is truncated down to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::Config`] for lifespans shorter than one second.
    pub fn new(backend: Arc<dyn KeyValueBackend>, lifespan: Duration) -> Result<Self> {
        let ttl_secs = lifespan.as_secs();
        if ttl_secs == 0 {
            return Err(RefreshError::Config(format!(
                "refresh token lifespan must be at least one second, got {lifespan:?}"
            )));
        }
        Ok(Self { backend, ttl_secs })
    }

    /// Expiry applied to every write, in seconds.
    #[must_use]
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Stores the session described by a "refresh token created" event.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::MalformedEvent`] if the event carries no token,
    /// or the backend error if the write fails.
    pub async fn ingest(&self, event: &Value) -> Result<()> {
        let form = PersistenceForm::from_event(event)?;
        self.save(&form).await?;
        tracing::debug!(client_id = %form.client_id, "ingested refresh token event");
        Ok(())
    }

    async fn save(&self, form: &PersistenceForm) -> Result<()> {
        let raw = form.encode()?;
        self.backend.set_ex(&form.token, &raw, self.ttl_secs).await
    }
}

#[async_trait]
impl RefreshTokenStore for RefreshTokenRepository {
    async fn create(&self, token: &str, session: &RefreshTokenSession) -> Result<()> {
        self.save(&PersistenceForm::new(token, session)).await
    }

    async fn get(&self, token: &str) -> Result<RefreshTokenSession> {
        let raw = self
            .backend
            .get(token)
            .await?
            .ok_or_else(OAuthError::invalid_grant)?;
        Ok(PersistenceForm::decode(&raw)?.into_session())
    }

    async fn delete(&self, token: &str) -> Result<()> {
        self.backend.delete(token).await
    }

    /// Tokens are not indexed by request, so there is nothing to remove.
    async fn delete_by_request_id(&self, _request_id: &str) -> Result<()> {
        Ok(())
    }
}
