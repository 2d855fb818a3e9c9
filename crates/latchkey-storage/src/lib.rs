//! Latchkey Storage Layer
//!
//! SQLite-backed persistence for the bearer credential.
//! A credential is scoped by cookie name and path and carries an expiry;
//! at most one credential exists per scope.

mod credential;
mod database;
mod error;
mod migrations;

pub use credential::{CookieStore, CredentialStore};
pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
