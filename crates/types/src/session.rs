//! Refresh-token session state and the handler-facing session sum type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Claim name to arbitrary JSON value.
pub type Claims = HashMap<String, Value>;

/// Snapshot of everything needed to honour a refresh token later.
///
/// The token itself is not part of the snapshot; it is the key under which
/// the snapshot is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenSession {
    pub client_id: String,
    pub scopes: BTreeSet<String>,
    pub granted_scopes: BTreeSet<String>,
    pub subject: String,
    pub obfuscated_subject: String,
    /// Seconds since the Unix epoch.
    pub auth_time: i64,
    /// Empty when no nonce was sent with the original authorization request.
    pub nonce: String,
    pub acr_values: Vec<String>,
    pub access_token_claims: Claims,
    pub id_token_claims: Claims,
}

/// Which [`Session`] variant a coordinator builds for its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    OAuth,
    #[default]
    Oidc,
}

/// Session data understood by plain OAuth 2.0 handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OAuthSession {
    pub subject: String,
    /// Scopes requested when the grant was first made.
    pub scopes: BTreeSet<String>,
    pub granted_scopes: BTreeSet<String>,
    pub access_token_claims: Claims,
}

/// Session data for OpenID Connect handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OidcSession {
    pub oauth: OAuthSession,
    pub obfuscated_subject: String,
    pub auth_time: i64,
    pub nonce: String,
    pub acr_values: Vec<String>,
    pub id_token_claims: Claims,
}

/// Session attached to an exchange, fixed to one variant at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    OAuth(OAuthSession),
    Oidc(OidcSession),
}

impl Session {
    /// Creates an empty session of the given kind.
    #[must_use]
    pub fn new(kind: SessionKind) -> Self {
        match kind {
            SessionKind::OAuth => Self::OAuth(OAuthSession::default()),
            SessionKind::Oidc => Self::Oidc(OidcSession::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::OAuth(_) => SessionKind::OAuth,
            Self::Oidc(_) => SessionKind::Oidc,
        }
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthSession {
        match self {
            Self::OAuth(s) => s,
            Self::Oidc(s) => &s.oauth,
        }
    }

    pub fn oauth_mut(&mut self) -> &mut OAuthSession {
        match self {
            Self::OAuth(s) => s,
            Self::Oidc(s) => &mut s.oauth,
        }
    }

    /// The OIDC view, if this session carries one.
    #[must_use]
    pub fn oidc(&self) -> Option<&OidcSession> {
        match self {
            Self::OAuth(_) => None,
            Self::Oidc(s) => Some(s),
        }
    }

    /// Fills this session from a stored snapshot, keeping the variant.
    ///
    /// OIDC fields of the snapshot are dropped for an OAuth session.
    pub fn restore(&mut self, stored: &RefreshTokenSession) {
        let oauth = OAuthSession {
            subject: stored.subject.clone(),
            scopes: stored.scopes.clone(),
            granted_scopes: stored.granted_scopes.clone(),
            access_token_claims: stored.access_token_claims.clone(),
        };
        *self = match self.kind() {
            SessionKind::OAuth => Self::OAuth(oauth),
            SessionKind::Oidc => Self::Oidc(OidcSession {
                oauth,
                obfuscated_subject: stored.obfuscated_subject.clone(),
                auth_time: stored.auth_time,
                nonce: stored.nonce.clone(),
                acr_values: stored.acr_values.clone(),
                id_token_claims: stored.id_token_claims.clone(),
            }),
        };
    }

    /// Builds the snapshot persisted for a newly issued refresh token.
    #[must_use]
    pub fn snapshot(&self, client_id: &str) -> RefreshTokenSession {
        let oauth = self.oauth();
        let mut snapshot = RefreshTokenSession {
            client_id: client_id.to_string(),
            scopes: oauth.scopes.clone(),
            granted_scopes: oauth.granted_scopes.clone(),
            subject: oauth.subject.clone(),
            access_token_claims: oauth.access_token_claims.clone(),
            ..RefreshTokenSession::default()
        };
        if let Some(oidc) = self.oidc() {
            snapshot.obfuscated_subject.clone_from(&oidc.obfuscated_subject);
            snapshot.auth_time = oidc.auth_time;
            snapshot.nonce.clone_from(&oidc.nonce);
            snapshot.acr_values.clone_from(&oidc.acr_values);
            snapshot.id_token_claims.clone_from(&oidc.id_token_claims);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored() -> RefreshTokenSession {
        RefreshTokenSession {
            client_id: "client-1".into(),
            scopes: ["openid".to_string(), "offline_access".to_string(), "email".to_string()]
                .into(),
            granted_scopes: ["openid".to_string(), "offline_access".to_string()].into(),
            subject: "alice".into(),
            obfuscated_subject: "c2f1a".into(),
            auth_time: 1_700_000_000,
            nonce: "n-0S6_WzA2Mj".into(),
            acr_values: vec!["urn:mace:incommon:iap:silver".into(), "0".into()],
            access_token_claims: HashMap::from([("tier".to_string(), json!("gold"))]),
            id_token_claims: HashMap::from([("email".to_string(), json!("a@example.com"))]),
        }
    }

    #[test]
    fn test_new_session_kind() {
        assert_eq!(Session::new(SessionKind::OAuth).kind(), SessionKind::OAuth);
        assert_eq!(Session::new(SessionKind::Oidc).kind(), SessionKind::Oidc);
    }

    #[test]
    fn test_oidc_restore_and_snapshot_roundtrip() {
        let s = stored();
        let mut session = Session::new(SessionKind::Oidc);
        session.restore(&s);
        assert_eq!(session.snapshot(&s.client_id), s);
    }

    #[test]
    fn test_oauth_restore_drops_oidc_fields() {
        let s = stored();
        let mut session = Session::new(SessionKind::OAuth);
        session.restore(&s);
        assert!(session.oidc().is_none());
        assert_eq!(session.oauth().subject, "alice");

        let snap = session.snapshot(&s.client_id);
        assert!(snap.obfuscated_subject.is_empty());
        assert!(snap.id_token_claims.is_empty());
        assert_eq!(snap.access_token_claims, s.access_token_claims);
    }

    #[test]
    fn test_restore_keeps_variant() {
        let mut session = Session::new(SessionKind::Oidc);
        session.restore(&stored());
        assert_eq!(session.kind(), SessionKind::Oidc);
        assert_eq!(session.oidc().unwrap().acr_values[0], "urn:mace:incommon:iap:silver");
    }
}
