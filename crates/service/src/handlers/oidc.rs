//! OpenID Connect refresh: issue a fresh ID token.

use super::{SCOPE_OPENID, unix_now};
use async_trait::async_trait;
use refresh_flow_types::{
    ExchangeContext, ExchangeHandler, Session, TokenResponse, TokenSigner, traits::Result,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Issues an ID token when the session is OIDC and `openid` is granted.
///
/// Relies on [`OAuthRefreshHandler`](super::OAuthRefreshHandler) having
/// restored the session in the update phase.
pub struct OidcRefreshHandler {
    signer: Arc<dyn TokenSigner>,
    issuer: String,
    id_token_lifespan: Duration,
}

impl OidcRefreshHandler {
    #[must_use]
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        issuer: impl Into<String>,
        id_token_lifespan: Duration,
    ) -> Self {
        Self {
            signer,
            issuer: issuer.into(),
            id_token_lifespan,
        }
    }
}

#[async_trait]
impl ExchangeHandler for OidcRefreshHandler {
    async fn update_session(&self, _ctx: &mut ExchangeContext) -> Result<()> {
        Ok(())
    }

    async fn handle_access_request(
        &self,
        ctx: &ExchangeContext,
        response: &mut TokenResponse,
    ) -> Result<()> {
        let Session::Oidc(session) = &ctx.session else {
            return Ok(());
        };
        if !ctx.granted_scopes.contains(SCOPE_OPENID) {
            return Ok(());
        }

        let now = unix_now();
        let lifespan = i64::try_from(self.id_token_lifespan.as_secs()).unwrap_or(i64::MAX);
        let subject = if session.obfuscated_subject.is_empty() {
            &session.oauth.subject
        } else {
            &session.obfuscated_subject
        };

        let mut claims: Map<String, Value> = session
            .id_token_claims
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        claims.insert("iss".into(), self.issuer.clone().into());
        claims.insert("sub".into(), subject.clone().into());
        claims.insert("aud".into(), ctx.client_id.clone().into());
        claims.insert("iat".into(), now.into());
        claims.insert("exp".into(), now.saturating_add(lifespan).into());
        if session.auth_time > 0 {
            claims.insert("auth_time".into(), session.auth_time.into());
        }
        if !session.nonce.is_empty() {
            claims.insert("nonce".into(), session.nonce.clone().into());
        }
        if let Some(acr) = session.acr_values.first() {
            claims.insert("acr".into(), acr.clone().into());
        }

        response.id_token = Some(self.signer.sign(&claims)?);
        Ok(())
    }
}
