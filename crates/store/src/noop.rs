//! Access-token store for self-contained access tokens.

use async_trait::async_trait;
use refresh_flow_types::{AccessTokenStore, OAuthError, RefreshTokenSession, traits::Result};

/// Keeps no access-token state; issued access tokens are signed and verified
/// on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAccessTokenStore;

#[async_trait]
impl AccessTokenStore for NoOpAccessTokenStore {
    async fn create(&self, _token: &str, _session: &RefreshTokenSession) -> Result<()> {
        Ok(())
    }

    async fn get(&self, _token: &str) -> Result<RefreshTokenSession> {
        Err(OAuthError::invalid_grant().into())
    }

    async fn delete(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_by_request_id(&self, _request_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nothing_is_kept() {
        let store = NoOpAccessTokenStore;
        store
            .create("at", &RefreshTokenSession::default())
            .await
            .unwrap();
        assert!(store.get("at").await.is_err());
        store.delete("at").await.unwrap();
        store.delete_by_request_id("req-1").await.unwrap();
    }
}
