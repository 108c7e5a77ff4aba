//! Error taxonomy for the refresh-flow workspace.
//!
//! [`OAuthError`] is the part of the taxonomy that may cross the network
//! boundary verbatim. [`RefreshError`] is the workspace-wide error; anything
//! that is not an [`OAuthError`] is collapsed into a generic
//! [`OAuthError::ServerError`] by [`RefreshError::into_oauth`].

use thiserror::Error;

const INVALID_GRANT: &str = "The provided authorization grant is invalid, expired, revoked, \
     or was issued to another client.";
const SERVER_ERROR: &str =
    "The authorization server encountered an unexpected condition that prevented it from fulfilling the request.";

/// Errors defined by the OAuth 2.0 / OpenID Connect token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// The refresh token is absent, expired, consumed, malformed, or bound to
    /// another client.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// Generic wrapper for everything outside the taxonomy.
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// The one `invalid_grant` used for every "token not usable" condition.
    #[must_use]
    pub fn invalid_grant() -> Self {
        Self::InvalidGrant(INVALID_GRANT.to_string())
    }

    /// A `server_error` that carries no internal detail.
    #[must_use]
    pub fn server_error() -> Self {
        Self::ServerError(SERVER_ERROR.to_string())
    }

    /// Machine-readable reason code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::ServerError(_) => "server_error",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::InvalidScope(d)
            | Self::AccessDenied(d)
            | Self::ServerError(d) => d,
        }
    }

    /// HTTP status a gateway should use when relaying this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidClient(_) => 401,
            Self::AccessDenied(_) => 403,
            Self::ServerError(_) => 500,
            _ => 400,
        }
    }
}

/// Enumerates all error kinds that can occur across refresh-flow crates.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// A failure inside the OAuth/OIDC taxonomy.
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// Persistent key-value backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event notification could not be turned into a session snapshot.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Token generation or signing failure.
    #[error("signing error: {0}")]
    Signing(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The exchange was cancelled before it completed.
    #[error("exchange cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for RefreshError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for RefreshError {
    fn from(e: redis::RedisError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl RefreshError {
    /// Returns `true` if this error belongs to the OAuth taxonomy.
    #[must_use]
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth(_))
    }

    /// Map onto the OAuth taxonomy. Non-OAuth errors lose their detail.
    #[must_use]
    pub fn into_oauth(self) -> OAuthError {
        match self {
            Self::OAuth(e) => e,
            _ => OAuthError::server_error(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RefreshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_code_and_status() {
        let err = OAuthError::invalid_grant();
        assert_eq!(err.code(), "invalid_grant");
        assert_eq!(err.status(), 400);
        assert!(err.to_string().starts_with("invalid_grant: "));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OAuthError::InvalidClient("x".into()).status(), 401);
        assert_eq!(OAuthError::AccessDenied("x".into()).status(), 403);
        assert_eq!(OAuthError::server_error().status(), 500);
        assert_eq!(OAuthError::InvalidScope("x".into()).status(), 400);
    }

    #[test]
    fn test_into_oauth_keeps_domain_errors() {
        let err = RefreshError::from(OAuthError::InvalidScope("too wide".into()));
        assert!(err.is_oauth());
        assert_eq!(
            err.into_oauth(),
            OAuthError::InvalidScope("too wide".into())
        );
    }

    #[test]
    fn test_into_oauth_hides_internal_detail() {
        let err = RefreshError::Storage("connection refused to 10.0.0.7:6379".into());
        let oauth = err.into_oauth();
        assert_eq!(oauth.code(), "server_error");
        assert!(!oauth.description().contains("10.0.0.7"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid {{{").unwrap_err();
        let err: RefreshError = json_err.into();
        assert!(matches!(err, RefreshError::Serialization(_)));
        assert_eq!(err.into_oauth(), OAuthError::server_error());
    }

    #[test]
    fn test_cancelled_is_server_error() {
        assert_eq!(
            RefreshError::Cancelled.into_oauth().code(),
            "server_error"
        );
    }
}
