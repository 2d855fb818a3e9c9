//! Unverified claims carried inside a credential
//!
//! The payload segment of a JWT-shaped credential is decoded without checking
//! the signature. The result is a hint for fields the identity service leaves
//! out, never an authority on its own.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use latchkey_identity::{AuthMethod, Role};

/// Every claim is optional and decoded on its own: a claim of an unexpected
/// type reads as absent instead of spoiling the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, rename = "_id", deserialize_with = "lenient_id")]
    pub document_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_email_verified: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub method: Option<AuthMethod>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub exp: Option<i64>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Identifiers may arrive as strings or numbers
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Seconds since the epoch, integral or not
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    })
}

impl Claims {
    /// `_id`, then `id`, falling back to the registered `sub` claim
    pub fn subject(&self) -> Option<&str> {
        self.document_id
            .as_deref()
            .or(self.id.as_deref())
            .or(self.sub.as_deref())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Credential is not a dot-separated token")]
    Malformed,

    #[error("Claims segment is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Claims segment is not a claims object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode the claims segment of `token` without verifying it
pub fn decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_header), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(ClaimsError::Malformed),
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}
