//! Provider scope owning the session manager

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use latchkey_identity::HttpIdentityClient;
use latchkey_session::{Navigator, Notifier, SessionManager, SessionState};
use latchkey_storage::{CookieStore, Database};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

/// Holds the session manager for the lifetime of a provider scope.
///
/// Descendants reach the session through [`AuthProvider::use_auth`]; a
/// provider that was never wired up, or has been unmounted, has no session.
pub struct AuthProvider {
    session: Arc<RwLock<Option<SessionManager>>>,
}

impl AuthProvider {
    pub fn new(config: Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::open(&config.database_path)?;
        let store = CookieStore::new(db, &config.cookie_name, &config.cookie_path)?;
        let identity = HttpIdentityClient::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;

        let manager = SessionManager::new(Arc::new(identity), Arc::new(store), navigator)
            .with_credential_max_age(chrono::Duration::days(config.credential_max_age_days));

        tracing::info!(
            api_base_url = %config.api_base_url,
            database = %config.database_path.display(),
            "Auth provider ready"
        );

        Ok(Self::with_manager(manager))
    }

    /// Wrap an already assembled manager
    pub fn with_manager(manager: SessionManager) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(manager))),
        }
    }

    /// A provider with no session behind it
    pub fn detached() -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        {
            let mut session = self.session.write();
            if let Some(manager) = session.take() {
                *session = Some(manager.with_notifier(notifier));
            }
        }
        self
    }

    /// Restore the session from the stored credential
    pub async fn mount(&self) -> Result<SessionState> {
        let manager = self.use_auth()?;
        Ok(manager.restore().await)
    }

    /// Drop the session. Handles obtained earlier keep working on their own.
    pub fn unmount(&self) {
        if self.session.write().take().is_some() {
            tracing::debug!("Auth provider unmounted");
        }
    }

    /// Handle to the session of this provider scope
    pub fn use_auth(&self) -> Result<SessionManager> {
        self.session.read().as_ref().cloned().ok_or_else(|| {
            CoreError::Config("use_auth must be used within an AuthProvider".to_string())
        })
    }
}

impl Clone for AuthProvider {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}
