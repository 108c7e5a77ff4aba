//! Canonical stored form of a refresh-token session.
//!
//! Fields are keyed by numeric tags instead of names. Other services sharing
//! the same store read and write this layout, so the tags must not change:
//!
//! | tag  | field              |
//! |------|--------------------|
//! | `0`  | token              |
//! | `1`  | client id          |
//! | `2`  | scopes             |
//! | `3`  | granted scopes     |
//! | `4`  | subject            |
//! | `5`  | obfuscated subject |
//! | `6`  | auth time          |
//! | `7`  | access token claims|
//! | `8`  | id token claims    |
//! | `9`  | acr values         |
//! | `10` | nonce              |

use refresh_flow_types::{Claims, RefreshError, RefreshTokenSession, traits::Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Compact, tag-keyed snapshot written to the key-value backend.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceForm {
    #[serde(rename = "0")]
    pub token: String,
    #[serde(rename = "1")]
    pub client_id: String,
    #[serde(rename = "2")]
    pub scopes: BTreeSet<String>,
    #[serde(rename = "3")]
    pub granted_scopes: BTreeSet<String>,
    #[serde(rename = "4")]
    pub subject: String,
    #[serde(rename = "5")]
    pub obfuscated_subject: String,
    #[serde(rename = "6")]
    pub auth_time: i64,
    #[serde(rename = "7")]
    pub access_token_claims: Claims,
    #[serde(rename = "8")]
    pub id_token_claims: Claims,
    #[serde(rename = "9")]
    pub acr_values: Vec<String>,
    #[serde(rename = "10")]
    pub nonce: String,
}

impl fmt::Debug for PersistenceForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceForm")
            .field("token", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("granted_scopes", &self.granted_scopes)
            .field("subject", &self.subject)
            .field("auth_time", &self.auth_time)
            .finish_non_exhaustive()
    }
}

impl PersistenceForm {
    /// Snapshot of `session` to be stored under `token`.
    #[must_use]
    pub fn new(token: &str, session: &RefreshTokenSession) -> Self {
        let s = session.clone();
        Self {
            token: token.to_string(),
            client_id: s.client_id,
            scopes: s.scopes,
            granted_scopes: s.granted_scopes,
            subject: s.subject,
            obfuscated_subject: s.obfuscated_subject,
            auth_time: s.auth_time,
            access_token_claims: s.access_token_claims,
            id_token_claims: s.id_token_claims,
            acr_values: s.acr_values,
            nonce: s.nonce,
        }
    }

    /// Parses an untrusted "refresh token created" event.
    ///
    /// Only `token` is required; any other missing or mistyped field falls
    /// back to its empty value.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::MalformedEvent`] if the event is not an object
    /// or carries no token.
    pub fn from_event(event: &Value) -> Result<Self> {
        let obj = event
            .as_object()
            .ok_or_else(|| RefreshError::MalformedEvent("event is not a JSON object".into()))?;

        let token = match obj.get("token") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => return Err(RefreshError::MalformedEvent("event has no token".into())),
        };

        Ok(Self {
            token,
            client_id: string(obj, "client_id"),
            scopes: strings(obj, "scopes").collect(),
            granted_scopes: strings(obj, "granted_scopes").collect(),
            subject: string(obj, "subject"),
            obfuscated_subject: string(obj, "obfuscated_subject"),
            auth_time: timestamp(obj, "auth_time"),
            nonce: string(obj, "nonce"),
            acr_values: strings(obj, "acr_values").collect(),
            access_token_claims: claims(obj, "access_token_claims"),
            id_token_claims: claims(obj, "id_token_claims"),
        })
    }

    /// # Errors
    ///
    /// Returns [`RefreshError::Serialization`] on encoder failure.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    ///
    /// Returns [`RefreshError::Serialization`] if `raw` is not a stored form.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub fn into_session(self) -> RefreshTokenSession {
        RefreshTokenSession {
            client_id: self.client_id,
            scopes: self.scopes,
            granted_scopes: self.granted_scopes,
            subject: self.subject,
            obfuscated_subject: self.obfuscated_subject,
            auth_time: self.auth_time,
            nonce: self.nonce,
            acr_values: self.acr_values,
            access_token_claims: self.access_token_claims,
            id_token_claims: self.id_token_claims,
        }
    }
}

fn string(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn strings<'a>(obj: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = String> + 'a {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp(obj: &Map<String, Value>, key: &str) -> i64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

fn claims(obj: &Map<String, Value>, key: &str) -> Claims {
    obj.get(key)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
