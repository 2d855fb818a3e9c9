//! Credential store
//!
//! The bearer credential lives in a cookie-style jar: one value per
//! (name, path) scope with an absolute expiry.

use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;

use crate::database::Database;
use crate::error::StorageError;
use crate::Result;

/// Scoped read/write/delete of a single bearer credential.
pub trait CredentialStore: Send + Sync {
    /// Current credential, if one is stored and not yet expired.
    fn get(&self) -> Result<Option<String>>;

    /// Replace the stored credential.
    fn set(&self, token: &str, max_age: Duration) -> Result<()>;

    /// Remove the stored credential entirely. Deleting an absent credential is not an error.
    fn delete(&self) -> Result<()>;
}

pub struct CookieStore {
    db: Database,
    name: String,
    path: String,
}

impl CookieStore {
    pub const DEFAULT_NAME: &'static str = "token";
    pub const DEFAULT_PATH: &'static str = "/";

    pub fn new(db: Database, name: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StorageError::EmptyCookieName);
        }

        let path = path.into();
        let path = if path.is_empty() {
            Self::DEFAULT_PATH.to_string()
        } else {
            path
        };

        Ok(Self { db, name, path })
    }

    /// Cookie named `token` scoped to `/`
    pub fn with_defaults(db: Database) -> Self {
        Self {
            db,
            name: Self::DEFAULT_NAME.to_string(),
            path: Self::DEFAULT_PATH.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expiry of the stored credential, expired or not
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.db.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT expires_at FROM cookies WHERE name = ?1 AND path = ?2",
                    [&self.name, &self.path],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })?;

        raw.map(|s| parse_timestamp(&s)).transpose()
    }
}

impl CredentialStore for CookieStore {
    fn get(&self) -> Result<Option<String>> {
        let row: Option<(String, String)> = self.db.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT value, expires_at FROM cookies WHERE name = ?1 AND path = ?2",
                    [&self.name, &self.path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };

        if parse_timestamp(&expires_at)? <= Utc::now() {
            tracing::debug!(cookie = %self.name, path = %self.path, "Dropping expired credential");
            self.delete()?;
            return Ok(None);
        }

        Ok(Some(value))
    }

    fn set(&self, token: &str, max_age: Duration) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + max_age;

        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cookies (name, path, value, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    self.name,
                    self.path,
                    token,
                    expires_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(
            cookie = %self.name,
            path = %self.path,
            expires_at = %expires_at,
            "Stored credential"
        );

        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "DELETE FROM cookies WHERE name = ?1 AND path = ?2",
                [&self.name, &self.path],
            )?;
            Ok(())
        })
    }
}

impl Clone for CookieStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(s.to_string()))
}
