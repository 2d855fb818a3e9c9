//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] latchkey_storage::StorageError),

    #[error("Identity client error: {0}")]
    Identity(#[from] latchkey_identity::IdentityError),

    #[error("Session error: {0}")]
    Session(#[from] latchkey_session::SessionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Filesystem failures while preparing the data directory
impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
