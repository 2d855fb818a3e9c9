//! Latchkey Session Management
//!
//! Turns a stored bearer credential into a typed, observable user session:
//! - Restore on start-up, silently signing out on any failure
//! - Login, OAuth redirect, registration, logout, email verification
//! - Credential store and observable state change together, never partially
//! - Operations carry a ticket; a stale completion never overwrites a newer one

mod claims;
mod error;
mod manager;
mod notify;
mod state;
mod user;

pub use claims::{decode_claims, Claims, ClaimsError};
pub use error::{AuthError, SessionError};
pub use manager::{SessionManager, DEFAULT_CREDENTIAL_MAX_AGE_DAYS};
pub use notify::{Navigator, Notifier, TracingNotifier};
pub use state::SessionState;
pub use user::User;

pub type Result<T> = std::result::Result<T, SessionError>;
