//! Observable session state

use serde::{Deserialize, Serialize};

use crate::user::User;

/// What consumers see: who is signed in, and whether the first
/// resolution attempt is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user: Option<User>,
    pub loading: bool,
}

impl SessionState {
    /// Nobody signed in yet, first resolution pending
    pub fn initial() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_admin)
    }
}
