//! Wire types for the identity service

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Credential;

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// How the account authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Local,
    Google,
    Facebook,
}

impl AuthMethod {
    /// Accounts signed in through an OAuth provider have a provider-verified email
    pub fn is_oauth(&self) -> bool {
        matches!(self, AuthMethod::Google | AuthMethod::Facebook)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Facebook,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Facebook => "facebook",
        }
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "facebook" => Ok(OAuthProvider::Facebook),
            _ => Err(format!("Unknown OAuth provider: {}", s)),
        }
    }
}

impl From<OAuthProvider> for AuthMethod {
    fn from(provider: OAuthProvider) -> Self {
        match provider {
            OAuthProvider::Google => AuthMethod::Google,
            OAuthProvider::Facebook => AuthMethod::Facebook,
        }
    }
}

/// Which side of the service an operation targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    User,
    Admin,
}

impl Scope {
    pub fn from_admin(is_admin: bool) -> Self {
        if is_admin {
            Scope::Admin
        } else {
            Scope::User
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Scope::Admin)
    }

    /// Path prefix of scoped endpoints
    pub fn auth_prefix(&self) -> &'static str {
        match self {
            Scope::User => "/auth",
            Scope::Admin => "/auth/admin",
        }
    }

    /// Value of the `state` marker carried through the OAuth round trip
    pub fn state_marker(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Admin => "admin",
        }
    }
}

/// Canonical user record as the service reports it. Every field is optional;
/// callers decide how to fill gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireUserRecord")]
pub struct UserRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_email_verified: Option<bool>,
    pub method: Option<AuthMethod>,
}

/// Record as sent over the wire. Document stores often send `_id` next to
/// a virtual `id`; `_id` wins when both are present.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUserRecord {
    #[serde(default, rename = "_id")]
    document_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    is_email_verified: Option<bool>,
    #[serde(default)]
    method: Option<AuthMethod>,
}

impl From<WireUserRecord> for UserRecord {
    fn from(wire: WireUserRecord) -> Self {
        Self {
            id: wire.document_id.or(wire.id),
            name: wire.name,
            email: wire.email,
            role: wire.role,
            is_email_verified: wire.is_email_verified,
            method: wire.method,
        }
    }
}

/// Decode the `data` of `/auth/user`: either `{ user: {...} }` or the record itself.
///
/// A `user` key always selects the wrapped shape, so a wrapped record that
/// does not decode is an error rather than an empty bare record.
pub(crate) fn user_record_from(mut data: Value) -> serde_json::Result<UserRecord> {
    let record = match data.get_mut("user").map(Value::take) {
        Some(user) => user,
        None => data,
    };
    serde_json::from_value(record)
}

/// `data` of the login endpoints
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoginData {
    pub user: UserRecord,
    #[serde(default)]
    pub token: Option<String>,
}

/// Successful login: the issued credential and the embedded user record
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub credential: Credential,
    pub user: UserRecord,
    pub message: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub otp: String,
}

impl VerifyEmailRequest {
    /// Build a request with surrounding whitespace stripped from the code
    pub fn new(email: impl Into<String>, otp: &str) -> Self {
        Self {
            email: email.into(),
            otp: otp.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}
