//! Wire types for the refresh exchange and the per-call handler context.

use crate::error::OAuthError;
use crate::session::{Session, SessionKind};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default `token_type` of issued access tokens.
pub const BEARER: &str = "bearer";

/// A refresh-token grant request as received over the wire.
///
/// Client authentication has already happened upstream; `client_id` is the
/// authenticated client.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub refresh_token: String,
    pub client_id: String,
    /// Requested scopes; empty means "everything originally granted".
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("refresh_token", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Issued tokens returned on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: Vec<String>,
}

/// Structured failure returned instead of a transport fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
    pub description: String,
    pub status: u16,
}

impl From<&OAuthError> for Failure {
    fn from(e: &OAuthError) -> Self {
        Self {
            error: e.code().to_string(),
            description: e.description().to_string(),
            status: e.status(),
        }
    }
}

/// The single response of one exchange call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ExchangeResponse {
    #[must_use]
    pub fn success(token: TokenPayload) -> Self {
        Self {
            success: true,
            token: Some(token),
            failure: None,
        }
    }

    #[must_use]
    pub fn failure(err: &OAuthError) -> Self {
        Self {
            success: false,
            token: None,
            failure: Some(err.into()),
        }
    }
}

/// Response accumulator mutated in place by handler phases.
#[derive(Default)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scope: BTreeSet<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Converts the accumulated fields into the wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::ServerError`] if no handler issued an access token.
    pub fn into_payload(self) -> Result<TokenPayload, OAuthError> {
        let access_token = self.access_token.ok_or_else(OAuthError::server_error)?;
        Ok(TokenPayload {
            access_token,
            token_type: self.token_type.unwrap_or_else(|| BEARER.to_string()),
            expires_in: self.expires_in,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            scope: self.scope.into_iter().collect(),
        })
    }
}

/// Per-call state shared by all handler phases.
#[derive(Debug)]
pub struct ExchangeContext {
    pub request_id: String,
    pub client_id: String,
    pub requested_scopes: BTreeSet<String>,
    /// The presented refresh token.
    pub refresh_token: SecretString,
    /// Scopes granted to this exchange; set by the session update phase.
    pub granted_scopes: BTreeSet<String>,
    pub session: Session,
}

impl ExchangeContext {
    /// Builds the context for one call; a request id is generated if absent.
    #[must_use]
    pub fn new(request: ExchangeRequest, kind: SessionKind) -> Self {
        Self {
            request_id: request
                .request_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            client_id: request.client_id,
            requested_scopes: request.scopes.into_iter().collect(),
            refresh_token: SecretString::from(request.refresh_token),
            granted_scopes: BTreeSet::new(),
            session: Session::new(kind),
        }
    }
}
