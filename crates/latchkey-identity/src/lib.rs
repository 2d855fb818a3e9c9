//! Latchkey Identity Client
//!
//! Typed access to the remote identity service:
//! - Every call receives the credential to attach explicitly (no ambient default header)
//! - Responses are decoded into typed envelopes
//! - Failures are result variants that keep the service/no-response/send distinction

mod client;
mod error;
mod http;
mod types;

pub use client::{Credential, IdentityService, RequestAuth};
pub use error::IdentityError;
pub use http::HttpIdentityClient;
pub use types::{
    ApiResponse, AuthMethod, LoginRequest, LoginResponse, OAuthProvider, RegisterRequest,
    ResendVerificationRequest, Role, Scope, UserRecord, VerifyEmailRequest,
};

pub type Result<T> = std::result::Result<T, IdentityError>;
