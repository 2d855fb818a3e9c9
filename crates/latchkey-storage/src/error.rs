//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid timestamp in credential row: {0}")]
    InvalidTimestamp(String),

    #[error("Cookie name cannot be empty")]
    EmptyCookieName,
}
