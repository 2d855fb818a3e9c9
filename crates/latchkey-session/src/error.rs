//! Session error types

use latchkey_identity::IdentityError;
use thiserror::Error;

/// User-facing failure of an auth operation. `Display` is exactly the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The identity service refused the request
    #[error("{0}")]
    Rejected(String),

    /// The request went out but nothing came back
    #[error("{0}")]
    Network(String),

    /// The request could not be sent, or the answer was unusable
    #[error("{0}")]
    Request(String),
}

impl AuthError {
    pub fn message(&self) -> &str {
        match self {
            AuthError::Rejected(m) | AuthError::Network(m) | AuthError::Request(m) => m,
        }
    }

    /// One default message for every failure kind; the service's own message wins
    pub(crate) fn collapsed(err: &IdentityError, default: &str) -> Self {
        Self::classified(
            err,
            &FailureMessages {
                rejected: default,
                no_response: default,
                request: default,
            },
        )
    }

    pub(crate) fn classified(err: &IdentityError, messages: &FailureMessages) -> Self {
        match err {
            IdentityError::Rejected { message, .. } => AuthError::Rejected(
                message
                    .clone()
                    .unwrap_or_else(|| messages.rejected.to_string()),
            ),
            IdentityError::NoResponse(_) => AuthError::Network(messages.no_response.to_string()),
            IdentityError::Request(_) | IdentityError::Decode(_) => {
                AuthError::Request(messages.request.to_string())
            }
        }
    }
}

/// Defaults per failure kind when the service supplies no message
pub(crate) struct FailureMessages<'a> {
    pub rejected: &'a str,
    pub no_response: &'a str,
    pub request: &'a str,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] latchkey_storage::StorageError),

    #[error("Superseded by a newer session operation")]
    Superseded,
}

impl SessionError {
    /// The user-facing message, if this is an auth failure
    pub fn auth_message(&self) -> Option<&str> {
        match self {
            SessionError::Auth(e) => Some(e.message()),
            _ => None,
        }
    }
}
