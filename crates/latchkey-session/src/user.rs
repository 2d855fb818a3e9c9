//! Canonical user

use serde::{Deserialize, Serialize};

use latchkey_identity::{AuthMethod, Role, UserRecord};

use crate::claims::Claims;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
}

impl User {
    /// Merge a service record with credential claims, field by field, service first.
    ///
    /// OAuth accounts count as verified even when neither side says so.
    /// Returns `None` when neither side identifies the user.
    pub fn from_parts(record: &UserRecord, claims: &Claims) -> Option<Self> {
        let id = record
            .id
            .clone()
            .or_else(|| claims.subject().map(str::to_string))?;

        let method = record.method.or(claims.method);
        let is_email_verified = record
            .is_email_verified
            .or(claims.is_email_verified)
            .unwrap_or(false)
            || method.is_some_and(|m| m.is_oauth());

        Some(Self {
            id,
            name: record.name.clone().unwrap_or_default(),
            email: record
                .email
                .clone()
                .or_else(|| claims.email.clone())
                .unwrap_or_default(),
            role: record.role.or(claims.role).unwrap_or_default(),
            is_email_verified,
            method,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
