//! Identity client error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The service answered and reported failure
    #[error("Identity service rejected the request: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: Option<u16>,
        message: Option<String>,
    },

    /// The request went out but no response came back
    #[error("No response from identity service: {0}")]
    NoResponse(String),

    /// The request could not be built or sent
    #[error("Request error: {0}")]
    Request(String),

    /// The service answered with a body that is not the expected envelope
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl IdentityError {
    pub fn rejected(status: Option<u16>, message: Option<String>) -> Self {
        IdentityError::Rejected {
            status,
            message: message.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Message supplied by the service, if it rejected the request with one
    pub fn service_message(&self) -> Option<&str> {
        match self {
            IdentityError::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_redirect() {
            IdentityError::Request(e.to_string())
        } else {
            IdentityError::NoResponse(e.to_string())
        }
    }
}
