//! HTTP implementation of the identity service

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::client::{Credential, IdentityService, RequestAuth};
use crate::error::IdentityError;
use crate::types::{
    user_record_from, ApiResponse, LoginData, LoginRequest, LoginResponse, OAuthProvider,
    RegisterRequest, ResendVerificationRequest, Scope, UserRecord, VerifyEmailRequest,
};
use crate::Result;

pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpIdentityClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append `path` to the base URL, keeping any path the base already has
    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| IdentityError::Request(format!("invalid endpoint {path}: {e}")))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        auth: &RequestAuth,
    ) -> Result<ApiResponse<T>> {
        let builder = match auth.credential() {
            Some(credential) => builder.bearer_auth(credential.as_str()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        interpret(status, &body)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        auth: &RequestAuth,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path)?;
        tracing::debug!(method = "GET", path = %path, "Identity request");
        self.send(self.client.get(url), auth).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        auth: &RequestAuth,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        let url = self.endpoint(path)?;
        tracing::debug!(method = "POST", path = %path, "Identity request");
        self.send(self.client.post(url).json(body), auth).await
    }
}

#[async_trait]
impl IdentityService for HttpIdentityClient {
    async fn current_user(&self, auth: &RequestAuth) -> Result<UserRecord> {
        let envelope: ApiResponse<Value> = self.get("/auth/user", auth).await?;

        let data = envelope
            .data
            .ok_or_else(|| IdentityError::Decode("user response carried no user".to_string()))?;

        user_record_from(data).map_err(|e| IdentityError::Decode(format!("user record: {e}")))
    }

    async fn login(
        &self,
        auth: &RequestAuth,
        scope: Scope,
        request: &LoginRequest,
    ) -> Result<LoginResponse> {
        let path = format!("{}/login", scope.auth_prefix());
        let envelope: ApiResponse<LoginData> = self.post(&path, auth, request).await?;

        let data = envelope
            .data
            .ok_or_else(|| IdentityError::Decode("login response carried no user".to_string()))?;

        let token = envelope
            .token
            .or(data.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IdentityError::Decode("login response carried no token".to_string()))?;

        Ok(LoginResponse {
            credential: Credential::new(token),
            user: data.user,
            message: envelope.message,
        })
    }

    async fn register(
        &self,
        auth: &RequestAuth,
        scope: Scope,
        request: &RegisterRequest,
    ) -> Result<ApiResponse<Value>> {
        let path = format!("{}/register", scope.auth_prefix());
        self.post(&path, auth, request).await
    }

    async fn logout(&self, auth: &RequestAuth) -> Result<ApiResponse<Value>> {
        self.get("/auth/logout", auth).await
    }

    async fn verify_email(
        &self,
        auth: &RequestAuth,
        request: &VerifyEmailRequest,
    ) -> Result<ApiResponse<Value>> {
        self.post("/auth/verify-email", auth, request).await
    }

    async fn resend_verification(
        &self,
        auth: &RequestAuth,
        request: &ResendVerificationRequest,
    ) -> Result<ApiResponse<Value>> {
        self.post("/auth/resend-verification", auth, request).await
    }

    fn oauth_url(&self, provider: OAuthProvider, scope: Scope) -> Result<Url> {
        let mut url = self.endpoint(&format!("{}/{}", scope.auth_prefix(), provider.as_str()))?;
        url.query_pairs_mut()
            .append_pair("state", scope.state_marker());
        Ok(url)
    }
}

/// Error bodies sometimes use `error` instead of `message`
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Map a status and raw body onto the envelope or a typed failure
fn interpret<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<ApiResponse<T>> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message.or(b.error));
        return Err(IdentityError::rejected(Some(status.as_u16()), message));
    }

    let envelope: ApiResponse<Value> =
        serde_json::from_slice(body).map_err(|e| IdentityError::Decode(e.to_string()))?;

    if !envelope.success {
        return Err(IdentityError::rejected(
            Some(status.as_u16()),
            envelope.message,
        ));
    }

    let data = match envelope.data {
        Some(Value::Null) | None => None,
        Some(value) => {
            Some(serde_json::from_value(value).map_err(|e| IdentityError::Decode(e.to_string()))?)
        }
    };

    Ok(ApiResponse {
        success: true,
        message: envelope.message,
        data,
        token: envelope.token,
    })
}
