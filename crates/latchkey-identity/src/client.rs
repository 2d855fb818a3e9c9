//! Identity service seam

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use url::Url;

use crate::types::{
    ApiResponse, LoginRequest, LoginResponse, OAuthProvider, RegisterRequest,
    ResendVerificationRequest, Scope, UserRecord, VerifyEmailRequest,
};
use crate::Result;

/// Opaque bearer token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// Per-call request configuration: the credential to send as a bearer header.
///
/// Callers build one of these from their current session for every request,
/// so a credential change is visible to the next request and never to one
/// already in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAuth {
    credential: Option<Credential>,
}

impl RequestAuth {
    pub fn anonymous() -> Self {
        Self { credential: None }
    }

    pub fn bearer(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }
}

impl From<Option<Credential>> for RequestAuth {
    fn from(credential: Option<Credential>) -> Self {
        Self { credential }
    }
}

/// Remote identity service.
///
/// Every method returns `Err(IdentityError::Rejected)` when the service
/// answers with `success: false` or an error status, so `Ok` always means
/// the service accepted the request.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// `GET /auth/user`
    async fn current_user(&self, auth: &RequestAuth) -> Result<UserRecord>;

    /// `POST /auth/login` or `/auth/admin/login`
    async fn login(
        &self,
        auth: &RequestAuth,
        scope: Scope,
        request: &LoginRequest,
    ) -> Result<LoginResponse>;

    /// `POST /auth/register` or `/auth/admin/register`
    async fn register(
        &self,
        auth: &RequestAuth,
        scope: Scope,
        request: &RegisterRequest,
    ) -> Result<ApiResponse<Value>>;

    /// `GET /auth/logout`
    async fn logout(&self, auth: &RequestAuth) -> Result<ApiResponse<Value>>;

    /// `POST /auth/verify-email`
    async fn verify_email(
        &self,
        auth: &RequestAuth,
        request: &VerifyEmailRequest,
    ) -> Result<ApiResponse<Value>>;

    /// `POST /auth/resend-verification`
    async fn resend_verification(
        &self,
        auth: &RequestAuth,
        request: &ResendVerificationRequest,
    ) -> Result<ApiResponse<Value>>;

    /// Full-page redirect target that starts an OAuth sign-in. Not a request.
    fn oauth_url(&self, provider: OAuthProvider, scope: Scope) -> Result<Url>;
}
