//! HMAC-based refresh-token strategy and HS256 token signer.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use refresh_flow_types::{
    OAuthError, RefreshError, RefreshTokenStrategy, TokenSigner, traits::Result,
};
use secrecy::{ExposeSecret, SecretSlice};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum decoded key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

fn decode_key(name: &str, encoded: &str) -> Result<SecretSlice<u8>> {
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| RefreshError::Config(format!("{name} is not valid base64: {e}")))?;
    if key.len() < MIN_KEY_LEN {
        return Err(RefreshError::Config(format!(
            "{name} must decode to at least {MIN_KEY_LEN} bytes"
        )));
    }
    Ok(key.into())
}

fn mac(key: &SecretSlice<u8>, data: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key.expose_secret())
        .map_err(|e| RefreshError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac)
}

/// Opaque refresh tokens of the form `base64url(value).base64url(hmac)`.
///
/// The value is 32 random bytes; the signature lets forged or mangled tokens
/// be rejected before the store is consulted.
pub struct HmacRefreshTokenStrategy {
    key: SecretSlice<u8>,
}

impl HmacRefreshTokenStrategy {
    /// # Errors
    ///
    /// Returns [`RefreshError::Config`] if the key is not base64 or too short.
    pub fn from_base64(key: &str) -> Result<Self> {
        Ok(Self {
            key: decode_key("refresh token key", key)?,
        })
    }
}

impl RefreshTokenStrategy for HmacRefreshTokenStrategy {
    fn generate(&self) -> Result<String> {
        let value = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
        let signature = mac(&self.key, value.as_bytes())?.finalize().into_bytes();
        Ok(format!("{value}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    fn validate(&self, token: &str) -> Result<()> {
        let (value, signature) = token.split_once('.').ok_or_else(OAuthError::invalid_grant)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| OAuthError::invalid_grant())?;
        mac(&self.key, value.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| OAuthError::invalid_grant())?;
        Ok(())
    }
}

/// Compact JWS signer using HMAC-SHA256.
pub struct Hs256Signer {
    key: EncodingKey,
    header: Header,
}

impl Hs256Signer {
    /// # Errors
    ///
    /// Returns [`RefreshError::Config`] if the key is not base64 or too short.
    pub fn from_base64(key: &str) -> Result<Self> {
        let secret = decode_key("signing key", key)?;
        Ok(Self {
            key: EncodingKey::from_secret(secret.expose_secret()),
            header: Header::new(Algorithm::HS256),
        })
    }
}

impl TokenSigner for Hs256Signer {
    fn sign(&self, claims: &Map<String, Value>) -> Result<String> {
        jsonwebtoken::encode(&self.header, claims, &self.key)
            .map_err(|e| RefreshError::Signing(e.to_string()))
    }
}
