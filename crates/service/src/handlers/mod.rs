//! Reference handlers for the refresh-token grant.
//!
//! [`OAuthRefreshHandler`] validates the presented refresh token, issues the
//! access token and rotates the refresh token. [`OidcRefreshHandler`] adds an
//! ID token for OpenID Connect sessions. Wire them in that order.

pub mod oauth;
pub mod oidc;

pub use oauth::OAuthRefreshHandler;
pub use oidc::OidcRefreshHandler;

use std::time::{SystemTime, UNIX_EPOCH};

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_OFFLINE_ACCESS: &str = "offline_access";

/// Seconds since the Unix epoch.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ExchangeCoordinator;
    use crate::strategy::tests::{KEY, claims_of};
    use crate::strategy::{HmacRefreshTokenStrategy, Hs256Signer};
    use refresh_flow_store::{MemoryBackend, NoOpAccessTokenStore, RefreshTokenRepository};
    use refresh_flow_types::{
        ExchangeHandler, ExchangeRequest, RefreshTokenSession, RefreshTokenStore,
        RefreshTokenStrategy, SessionKind,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        store: Arc<RefreshTokenRepository>,
        strategy: Arc<HmacRefreshTokenStrategy>,
        coordinator: ExchangeCoordinator,
    }

    fn fixture(kind: SessionKind) -> Fixture {
        let store = Arc::new(
            RefreshTokenRepository::new(Arc::new(MemoryBackend::new()), Duration::from_secs(600))
                .unwrap(),
        );
        let strategy = Arc::new(HmacRefreshTokenStrategy::from_base64(KEY).unwrap());
        let signer = Arc::new(Hs256Signer::from_base64(KEY).unwrap());

        let handlers: Vec<Arc<dyn ExchangeHandler>> = vec![
            Arc::new(OAuthRefreshHandler::new(
                store.clone(),
                Arc::new(NoOpAccessTokenStore),
                strategy.clone(),
                signer.clone(),
                "https://issuer.example",
                Duration::from_secs(3600),
            )),
            Arc::new(OidcRefreshHandler::new(
                signer,
                "https://issuer.example",
                Duration::from_secs(3600),
            )),
        ];
        Fixture {
            store,
            strategy,
            coordinator: ExchangeCoordinator::new(handlers, kind, 4),
        }
    }

    fn stored(scopes: &[&str]) -> RefreshTokenSession {
        let scopes: std::collections::BTreeSet<String> =
            scopes.iter().map(ToString::to_string).collect();
        RefreshTokenSession {
            client_id: "client-1".into(),
            scopes: scopes.clone(),
            granted_scopes: scopes,
            subject: "alice".into(),
            obfuscated_subject: "pairwise-alice".into(),
            auth_time: 1_700_000_000,
            nonce: "n-123".into(),
            acr_values: vec!["urn:acr:silver".into()],
            access_token_claims: HashMap::from([("tier".to_string(), json!("gold"))]),
            id_token_claims: HashMap::from([("email".to_string(), json!("a@example.com"))]),
        }
    }

    async fn issue(f: &Fixture, session: &RefreshTokenSession) -> String {
        let token = f.strategy.generate().unwrap();
        f.store.create(&token, session).await.unwrap();
        token
    }

    fn request(token: &str, client_id: &str, scopes: &[&str]) -> ExchangeRequest {
        ExchangeRequest {
            refresh_token: token.into(),
            client_id: client_id.into(),
            scopes: scopes.iter().map(ToString::to_string).collect(),
            request_id: None,
        }
    }

    fn error_of(resp: &refresh_flow_types::ExchangeResponse) -> String {
        assert!(!resp.success);
        resp.failure.as_ref().unwrap().error.clone()
    }

    #[tokio::test]
    async fn test_oidc_refresh_issues_all_tokens() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;

        let resp = f.coordinator.exchange(request(&token, "client-1", &[])).await;
        assert!(resp.success, "{:?}", resp.failure);
        let payload = resp.token.unwrap();
        assert_eq!(payload.token_type, "bearer");
        assert_eq!(payload.expires_in, 3600);
        assert_eq!(payload.scope, vec!["offline_access", "openid"]);

        let access = claims_of(&payload.access_token);
        assert_eq!(access["sub"], "alice");
        assert_eq!(access["aud"], "client-1");
        assert_eq!(access["tier"], "gold");
        assert_eq!(access["scope"], "offline_access openid");

        let id = claims_of(payload.id_token.as_deref().unwrap());
        assert_eq!(id["iss"], "https://issuer.example");
        assert_eq!(id["sub"], "pairwise-alice");
        assert_eq!(id["aud"], "client-1");
        assert_eq!(id["auth_time"], 1_700_000_000);
        assert_eq!(id["nonce"], "n-123");
        assert_eq!(id["acr"], "urn:acr:silver");
        assert_eq!(id["email"], "a@example.com");
    }

    #[tokio::test]
    async fn test_refresh_token_is_rotated() {
        let f = fixture(SessionKind::Oidc);
        let old = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;

        let resp = f.coordinator.exchange(request(&old, "client-1", &[])).await;
        let new = resp.token.unwrap().refresh_token.unwrap();
        assert_ne!(new, old);
        f.strategy.validate(&new).unwrap();
        assert_eq!(f.store.get(&new).await.unwrap(), stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS]));
        assert!(f.store.get(&old).await.is_err());

        let replay = f.coordinator.exchange(request(&old, "client-1", &[])).await;
        assert_eq!(error_of(&replay), "invalid_grant");
    }

    #[tokio::test]
    async fn test_rotation_keeps_requested_scopes() {
        let f = fixture(SessionKind::Oidc);
        let mut session = stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS]);
        session.scopes.insert("email".into());
        let old = issue(&f, &session).await;

        let first = f.coordinator.exchange(request(&old, "client-1", &[])).await;
        let middle = first.token.unwrap().refresh_token.unwrap();
        let second = f.coordinator.exchange(request(&middle, "client-1", &[])).await;
        let latest = second.token.unwrap().refresh_token.unwrap();

        let snapshot = f.store.get(&latest).await.unwrap();
        assert_eq!(snapshot.scopes, session.scopes);
        assert_eq!(snapshot.granted_scopes, session.granted_scopes);
    }

    #[tokio::test]
    async fn test_missing_token_is_invalid_grant() {
        let f = fixture(SessionKind::Oidc);
        let unknown = f.strategy.generate().unwrap();
        let resp = f.coordinator.exchange(request(&unknown, "client-1", &[])).await;
        assert_eq!(error_of(&resp), "invalid_grant");

        let resp = f.coordinator.exchange(request("tok-missing", "client-1", &[])).await;
        assert_eq!(error_of(&resp), "invalid_grant");
    }

    #[tokio::test]
    async fn test_other_client_is_invalid_grant() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;
        let resp = f.coordinator.exchange(request(&token, "client-2", &[])).await;
        assert_eq!(error_of(&resp), "invalid_grant");
        assert!(f.store.get(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_scope_beyond_grant_is_invalid_scope() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;
        let resp = f
            .coordinator
            .exchange(request(&token, "client-1", &[SCOPE_OPENID, "admin"]))
            .await;
        assert_eq!(error_of(&resp), "invalid_scope");
    }

    #[tokio::test]
    async fn test_narrowed_scope_skips_id_token() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;
        let resp = f
            .coordinator
            .exchange(request(&token, "client-1", &[SCOPE_OFFLINE_ACCESS]))
            .await;
        let payload = resp.token.unwrap();
        assert_eq!(payload.scope, vec!["offline_access"]);
        assert!(payload.id_token.is_none());
        assert!(payload.refresh_token.is_some());
    }

    #[tokio::test]
    async fn test_without_offline_access_no_rotation() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID])).await;
        let resp = f.coordinator.exchange(request(&token, "client-1", &[])).await;
        let payload = resp.token.unwrap();
        assert!(payload.refresh_token.is_none());
        assert!(payload.id_token.is_some());
        assert!(f.store.get(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_oauth_session_has_no_id_token() {
        let f = fixture(SessionKind::OAuth);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;
        let resp = f.coordinator.exchange(request(&token, "client-1", &[])).await;
        let payload = resp.token.unwrap();
        assert!(payload.id_token.is_none());

        let rotated = payload.refresh_token.unwrap();
        let snapshot = f.store.get(&rotated).await.unwrap();
        assert!(snapshot.obfuscated_subject.is_empty());
        assert_eq!(snapshot.subject, "alice");
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_complete_independently() {
        let f = fixture(SessionKind::Oidc);
        let token = issue(&f, &stored(&[SCOPE_OPENID, SCOPE_OFFLINE_ACCESS])).await;

        let (ok, missing) = tokio::join!(
            f.coordinator.exchange(request(&token, "client-1", &[])),
            f.coordinator.exchange(request("tok-missing", "client-1", &[])),
        );
        assert!(ok.success);
        assert_eq!(error_of(&missing), "invalid_grant");
    }
}
