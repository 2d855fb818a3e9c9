//! Latchkey Core
//!
//! Composition root: wires the credential store, the identity client and the
//! session manager into a provider scope that the application reads from.

mod config;
mod error;
mod provider;

pub use config::Config;
pub use error::CoreError;
pub use provider::AuthProvider;

// Re-export core components
pub use latchkey_identity::{
    ApiResponse, AuthMethod, Credential, HttpIdentityClient, IdentityError, IdentityService,
    OAuthProvider, RequestAuth, Role, Scope, UserRecord,
};
pub use latchkey_session::{
    decode_claims, AuthError, Claims, ClaimsError, Navigator, Notifier, SessionError,
    SessionManager, SessionState, TracingNotifier, User,
};
pub use latchkey_storage::{CookieStore, CredentialStore, Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
