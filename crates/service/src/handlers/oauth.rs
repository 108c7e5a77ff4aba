//! OAuth 2.0 refresh: validate, issue the access token, rotate the refresh token.

use super::{SCOPE_OFFLINE_ACCESS, unix_now};
use async_trait::async_trait;
use refresh_flow_types::{
    AccessTokenStore, ExchangeContext, ExchangeHandler, OAuthError, RefreshTokenStore,
    RefreshTokenStrategy, TokenResponse, TokenSigner, exchange::BEARER, traits::Result,
};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Redeems a stored refresh token for a signed access token and, when the
/// grant includes `offline_access`, a rotated refresh token.
pub struct OAuthRefreshHandler {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    access_tokens: Arc<dyn AccessTokenStore>,
    strategy: Arc<dyn RefreshTokenStrategy>,
    signer: Arc<dyn TokenSigner>,
    issuer: String,
    access_token_lifespan: Duration,
}

impl OAuthRefreshHandler {
    /// Access tokens are signed by `signer` with `issuer` as `iss` and expire
    /// after `access_token_lifespan`.
    #[must_use]
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        access_tokens: Arc<dyn AccessTokenStore>,
        strategy: Arc<dyn RefreshTokenStrategy>,
        signer: Arc<dyn TokenSigner>,
        issuer: impl Into<String>,
        access_token_lifespan: Duration,
    ) -> Self {
        Self {
            refresh_tokens,
            access_tokens,
            strategy,
            signer,
            issuer: issuer.into(),
            access_token_lifespan,
        }
    }

    fn access_token_claims(&self, ctx: &ExchangeContext) -> Map<String, Value> {
        let session = ctx.session.oauth();
        let now = unix_now();
        let lifespan = i64::try_from(self.access_token_lifespan.as_secs()).unwrap_or(i64::MAX);

        let mut claims: Map<String, Value> = session
            .access_token_claims
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        claims.insert("iss".into(), self.issuer.clone().into());
        claims.insert("sub".into(), session.subject.clone().into());
        claims.insert("aud".into(), ctx.client_id.clone().into());
        claims.insert("client_id".into(), ctx.client_id.clone().into());
        claims.insert("iat".into(), now.into());
        claims.insert("exp".into(), now.saturating_add(lifespan).into());
        claims.insert("jti".into(), uuid::Uuid::new_v4().to_string().into());
        claims.insert(
            "scope".into(),
            ctx.granted_scopes
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ")
                .into(),
        );
        claims
    }
}

#[async_trait]
impl ExchangeHandler for OAuthRefreshHandler {
    async fn update_session(&self, ctx: &mut ExchangeContext) -> Result<()> {
        let token = ctx.refresh_token.expose_secret();
        self.strategy.validate(token)?;
        let stored = self.refresh_tokens.get(token).await?;

        if stored.client_id != ctx.client_id {
            tracing::warn!("refresh token presented by another client");
            return Err(OAuthError::invalid_grant().into());
        }
        if !ctx.requested_scopes.is_subset(&stored.granted_scopes) {
            return Err(OAuthError::InvalidScope(
                "The requested scope exceeds the scope originally granted.".into(),
            )
            .into());
        }

        ctx.granted_scopes = if ctx.requested_scopes.is_empty() {
            stored.granted_scopes.clone()
        } else {
            ctx.requested_scopes.clone()
        };
        ctx.session.restore(&stored);
        Ok(())
    }

    async fn handle_access_request(
        &self,
        ctx: &ExchangeContext,
        response: &mut TokenResponse,
    ) -> Result<()> {
        let access_token = self.signer.sign(&self.access_token_claims(ctx))?;
        self.access_tokens
            .delete_by_request_id(&ctx.request_id)
            .await?;

        let grant = &ctx.session.oauth().granted_scopes;
        if grant.contains(SCOPE_OFFLINE_ACCESS) {
            let rotated = self.strategy.generate()?;
            self.refresh_tokens
                .delete(ctx.refresh_token.expose_secret())
                .await?;
            self.refresh_tokens
                .create(&rotated, &ctx.session.snapshot(&ctx.client_id))
                .await?;
            response.refresh_token = Some(rotated);
            tracing::debug!("refresh token rotated");
        }

        response.access_token = Some(access_token);
        response.token_type = Some(BEARER.to_string());
        response.expires_in = self.access_token_lifespan.as_secs();
        response.scope.clone_from(&ctx.granted_scopes);
        Ok(())
    }
}
