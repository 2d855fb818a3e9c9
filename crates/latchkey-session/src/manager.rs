//! Session Manager
//!
//! Owns the credential, the observable session state and the lifecycle
//! operations that move between signed-out and signed-in.
//!
//! Every identity-mutating operation (`restore`, `login`, `logout`) takes a
//! ticket when it starts. A completion commits only if no later ticket has
//! committed first, so overlapping operations settle in call order rather
//! than completion order.

use chrono::Duration;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use latchkey_identity::{
    ApiResponse, Credential, IdentityService, LoginRequest, OAuthProvider, RegisterRequest,
    RequestAuth, ResendVerificationRequest, Role, Scope, VerifyEmailRequest,
};
use latchkey_storage::CredentialStore;

use crate::claims::{decode_claims, Claims};
use crate::error::{AuthError, FailureMessages, SessionError};
use crate::notify::{Navigator, Notifier, TracingNotifier};
use crate::state::SessionState;
use crate::user::User;
use crate::Result;

const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";
const NETWORK_ERROR: &str = "Network error. Please try again.";
const LOGGED_OUT: &str = "Logged out successfully";
const LOGOUT_FAILED: &str = "Logout failed";

const VERIFY_MESSAGES: FailureMessages<'static> = FailureMessages {
    rejected: "Invalid or expired OTP",
    no_response: NETWORK_ERROR,
    request: "Verification failed. Please try again.",
};

const RESEND_MESSAGES: FailureMessages<'static> = FailureMessages {
    rejected: "Failed to resend OTP",
    no_response: NETWORK_ERROR,
    request: "Could not send verification request. Please try again.",
};

/// Credential lifetime when none is configured
pub const DEFAULT_CREDENTIAL_MAX_AGE_DAYS: i64 = 7;

/// Mutable session bookkeeping guarded by one lock
struct Ledger {
    /// Credential attached to outgoing requests
    credential: Option<Credential>,
    /// Highest ticket that has committed
    committed: u64,
}

pub struct SessionManager {
    /// Remote identity service
    identity: Arc<dyn IdentityService>,
    /// Persisted credential
    store: Arc<dyn CredentialStore>,
    /// User-facing notices
    notifier: Arc<dyn Notifier>,
    /// Full-page redirects
    navigator: Arc<dyn Navigator>,
    credential_max_age: Duration,
    ledger: Arc<Mutex<Ledger>>,
    next_ticket: Arc<AtomicU64>,
    /// Published session state
    state: Arc<watch::Sender<SessionState>>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::initial());

        Self {
            identity,
            store,
            notifier: Arc::new(TracingNotifier),
            navigator,
            credential_max_age: Duration::days(DEFAULT_CREDENTIAL_MAX_AGE_DAYS),
            ledger: Arc::new(Mutex::new(Ledger {
                credential: None,
                committed: 0,
            })),
            next_ticket: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_credential_max_age(mut self, max_age: Duration) -> Self {
        self.credential_max_age = max_age;
        self
    }

    // === Observation ===

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receives every committed state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Whether a credential is attached to outgoing requests
    pub fn credential_present(&self) -> bool {
        self.ledger.lock().credential.is_some()
    }

    // === Lifecycle ===

    /// Rebuild the session from the stored credential.
    ///
    /// Never fails: a missing, rejected or unreadable credential leaves the
    /// session signed out. `loading` is cleared on every exit route.
    pub async fn restore(&self) -> SessionState {
        {
            let _loading = LoadingGuard { manager: self };
            self.resolve_stored_credential().await;
        }
        self.state()
    }

    async fn resolve_stored_credential(&self) {
        let ticket = self.ticket();

        let stored = match self.store.get() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "Unreadable stored credential, discarding it");
                self.commit_or_log(ticket, "restore", |ledger, state| {
                    self.clear_local(ledger, state);
                    Ok(())
                });
                return;
            }
        };

        let Some(token) = stored else {
            tracing::debug!("No stored credential");
            self.commit_or_log(ticket, "restore", |ledger, state| {
                ledger.credential = None;
                state.user = None;
                Ok(())
            });
            return;
        };

        let credential = Credential::new(token);
        let claims = match decode_claims(credential.as_str()) {
            Ok(claims) => {
                if let Some(expires_at) = claims.expires_at() {
                    tracing::debug!(expires_at = %expires_at, "Stored credential claims");
                }
                claims
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stored credential carries no readable claims");
                Claims::default()
            }
        };

        let resolved = self
            .identity
            .current_user(&RequestAuth::bearer(credential.clone()))
            .await
            .map_err(|e| e.to_string())
            .and_then(|record| {
                User::from_parts(&record, &claims)
                    .ok_or_else(|| "identity service returned a user without an id".to_string())
            });

        match resolved {
            Ok(user) => {
                let user_id = user.id.clone();
                let committed = self.commit_or_log(ticket, "restore", |ledger, state| {
                    ledger.credential = Some(credential);
                    state.user = Some(user);
                    Ok(())
                });
                if committed {
                    tracing::info!(user_id = %user_id, "Restored session");
                }
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Stored credential rejected, signing out");
                self.commit_or_log(ticket, "restore", |ledger, state| {
                    self.clear_local(ledger, state);
                    Ok(())
                });
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// An admin-scoped login always yields an admin user, whatever role the
    /// service reports.
    pub async fn login(&self, email: &str, password: &str, is_admin: bool) -> Result<User> {
        let ticket = self.ticket();
        let scope = Scope::from_admin(is_admin);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = self
            .identity
            .login(&self.request_auth(), scope, &request)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, admin = is_admin, "Login failed");
                AuthError::collapsed(&e, LOGIN_FAILED)
            })?;

        // Built from the embedded record alone; token claims are not consulted
        let mut user = User::from_parts(&response.user, &Claims::default()).ok_or_else(|| {
            tracing::warn!("Login response carried a user without an id");
            AuthError::Request(LOGIN_FAILED.to_string())
        })?;

        if scope.is_admin() {
            user.role = Role::Admin;
        }

        let credential = response.credential;
        self.commit(ticket, |ledger, state| {
            self.store
                .set(credential.as_str(), self.credential_max_age)?;
            ledger.credential = Some(credential);
            state.user = Some(user.clone());
            Ok(())
        })
        .map_err(|e| {
            if matches!(e, SessionError::Superseded) {
                tracing::warn!(ticket, "Login completed after a newer session operation");
            }
            e
        })?;

        tracing::info!(
            user_id = %user.id,
            role = user.role.as_str(),
            "Signed in"
        );

        Ok(user)
    }

    /// Start an OAuth sign-in by navigating away to the provider flow.
    ///
    /// Completion happens on the page the provider returns to, through `restore`.
    pub fn login_with_oauth(&self, provider: OAuthProvider, is_admin: bool) {
        let scope = Scope::from_admin(is_admin);

        match self.identity.oauth_url(provider, scope) {
            Ok(url) => {
                tracing::info!(provider = provider.as_str(), admin = is_admin, "Redirecting to OAuth provider");
                self.navigator.navigate(&url);
            }
            Err(e) => {
                tracing::error!(error = %e, provider = provider.as_str(), "Cannot build OAuth redirect");
            }
        }
    }

    /// Create an account. Does not sign in.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_admin: bool,
    ) -> std::result::Result<ApiResponse<Value>, AuthError> {
        let request = RegisterRequest {
            name: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };

        self.identity
            .register(&self.request_auth(), Scope::from_admin(is_admin), &request)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, admin = is_admin, "Registration failed");
                AuthError::collapsed(&e, REGISTRATION_FAILED)
            })
    }

    /// Sign out. The local session is torn down whatever the service answers,
    /// and even if this future is dropped before the service answers.
    pub async fn logout(&self) {
        let ticket = self.ticket();
        let auth = self.request_auth();

        let teardown = TeardownGuard {
            manager: self,
            ticket,
            armed: true,
        };
        let outcome = self.identity.logout(&auth).await;
        let torn_down = teardown.finish();

        match outcome {
            Ok(_) if torn_down => {
                tracing::info!("Signed out");
                self.notifier.success(LOGGED_OUT);
            }
            Ok(_) => {
                tracing::info!("Logout acknowledged, but a newer sign-in keeps the session");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Logout request failed, local session cleared");
                self.notifier.error(LOGOUT_FAILED);
            }
        }
    }

    /// Submit an email verification code. Surrounding whitespace is stripped
    /// from the code. Does not change the session.
    pub async fn verify_email(
        &self,
        email: &str,
        otp: &str,
    ) -> std::result::Result<ApiResponse<Value>, AuthError> {
        let request = VerifyEmailRequest::new(email, otp);

        self.identity
            .verify_email(&self.request_auth(), &request)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Email verification failed");
                AuthError::classified(&e, &VERIFY_MESSAGES)
            })
    }

    /// Ask the service to send a fresh verification code
    pub async fn resend_otp(
        &self,
        email: &str,
    ) -> std::result::Result<ApiResponse<Value>, AuthError> {
        let request = ResendVerificationRequest {
            email: email.to_string(),
        };

        self.identity
            .resend_verification(&self.request_auth(), &request)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Resending verification code failed");
                AuthError::classified(&e, &RESEND_MESSAGES)
            })
    }

    // === Internals ===

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Request configuration carrying the current credential
    fn request_auth(&self) -> RequestAuth {
        RequestAuth::from(self.ledger.lock().credential.clone())
    }

    /// Apply a state transition for `ticket` and publish it.
    ///
    /// Credential store, attached credential and published state change under
    /// one lock. Nothing is published if `apply` fails or a newer ticket
    /// already committed.
    fn commit<T, F>(&self, ticket: u64, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Ledger, &mut SessionState) -> Result<T>,
    {
        let mut ledger = self.ledger.lock();
        if ticket <= ledger.committed {
            return Err(SessionError::Superseded);
        }

        let mut next = self.state.borrow().clone();
        let value = apply(&mut ledger, &mut next)?;

        ledger.committed = ticket;
        self.state.send_replace(next);

        Ok(value)
    }

    /// `commit` for operations that cannot report failure to their caller
    fn commit_or_log<F>(&self, ticket: u64, operation: &'static str, apply: F) -> bool
    where
        F: FnOnce(&mut Ledger, &mut SessionState) -> Result<()>,
    {
        match self.commit(ticket, apply) {
            Ok(()) => true,
            Err(SessionError::Superseded) => {
                tracing::debug!(ticket, operation, "Discarding stale session update");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, operation, "Session update failed");
                false
            }
        }
    }

    /// Remove every trace of the credential locally
    fn clear_local(&self, ledger: &mut Ledger, state: &mut SessionState) {
        if let Err(e) = self.store.delete() {
            tracing::error!(error = %e, "Failed to delete stored credential");
        }
        ledger.credential = None;
        state.user = None;
    }
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            navigator: Arc::clone(&self.navigator),
            credential_max_age: self.credential_max_age,
            ledger: Arc::clone(&self.ledger),
            next_ticket: Arc::clone(&self.next_ticket),
            state: Arc::clone(&self.state),
        }
    }
}

/// Clears `loading` when the restore scope ends, however it ends
struct LoadingGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        // Held so a concurrent commit cannot republish a stale `loading`
        let _ledger = self.manager.ledger.lock();
        self.manager.state.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }
}

/// Tears the local session down when the logout scope ends, however it ends
struct TeardownGuard<'a> {
    manager: &'a SessionManager,
    ticket: u64,
    armed: bool,
}

impl TeardownGuard<'_> {
    /// Tear down now; whether the teardown landed or a newer operation won
    fn finish(mut self) -> bool {
        self.armed = false;
        self.tear_down()
    }

    fn tear_down(&self) -> bool {
        let manager = self.manager;
        manager.commit_or_log(self.ticket, "logout", |ledger, state| {
            manager.clear_local(ledger, state);
            Ok(())
        })
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tear_down();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::tests::token_with;
    use async_trait::async_trait;
    use latchkey_identity::{AuthMethod, IdentityError, LoginResponse, UserRecord};
    use latchkey_storage::{CookieStore, Database};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use tokio::sync::oneshot;
    use url::Url;

    type Reply<T> = std::result::Result<T, IdentityError>;

    /// Identity service answering from scripted queues and recording every call
    #[derive(Default)]
    struct ScriptedIdentity {
        current_user: Mutex<VecDeque<Reply<UserRecord>>>,
        login: Mutex<VecDeque<Reply<LoginResponse>>>,
        login_gate: Mutex<Option<oneshot::Receiver<()>>>,
        logout: Mutex<VecDeque<Reply<ApiResponse<Value>>>>,
        logout_gate: Mutex<Option<oneshot::Receiver<()>>>,
        register: Mutex<VecDeque<Reply<ApiResponse<Value>>>>,
        verify: Mutex<VecDeque<Reply<ApiResponse<Value>>>>,
        resend: Mutex<VecDeque<Reply<ApiResponse<Value>>>>,
        calls: Mutex<Vec<(String, Option<String>)>>,
        otps: Mutex<Vec<String>>,
    }

    impl ScriptedIdentity {
        fn record(&self, endpoint: &str, auth: &RequestAuth) {
            self.calls.lock().push((
                endpoint.to_string(),
                auth.credential().map(|c| c.as_str().to_string()),
            ));
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().clone()
        }

        fn next<T>(queue: &Mutex<VecDeque<Reply<T>>>) -> Reply<T> {
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(IdentityError::NoResponse("unscripted".to_string())))
        }
    }

    #[async_trait]
    impl IdentityService for ScriptedIdentity {
        async fn current_user(&self, auth: &RequestAuth) -> Reply<UserRecord> {
            self.record("current_user", auth);
            Self::next(&self.current_user)
        }

        async fn login(
            &self,
            auth: &RequestAuth,
            scope: Scope,
            _request: &LoginRequest,
        ) -> Reply<LoginResponse> {
            self.record(if scope.is_admin() { "admin_login" } else { "login" }, auth);
            let gate = self.login_gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Self::next(&self.login)
        }

        async fn register(
            &self,
            auth: &RequestAuth,
            scope: Scope,
            _request: &RegisterRequest,
        ) -> Reply<ApiResponse<Value>> {
            self.record(
                if scope.is_admin() { "admin_register" } else { "register" },
                auth,
            );
            Self::next(&self.register)
        }

        async fn logout(&self, auth: &RequestAuth) -> Reply<ApiResponse<Value>> {
            self.record("logout", auth);
            let gate = self.logout_gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Self::next(&self.logout)
        }

        async fn verify_email(
            &self,
            auth: &RequestAuth,
            request: &VerifyEmailRequest,
        ) -> Reply<ApiResponse<Value>> {
            self.record("verify_email", auth);
            self.otps.lock().push(request.otp.clone());
            Self::next(&self.verify)
        }

        async fn resend_verification(
            &self,
            auth: &RequestAuth,
            _request: &ResendVerificationRequest,
        ) -> Reply<ApiResponse<Value>> {
            self.record("resend_verification", auth);
            Self::next(&self.resend)
        }

        fn oauth_url(&self, provider: OAuthProvider, scope: Scope) -> Reply<Url> {
            let url = format!(
                "https://id.example.com{}/{}?state={}",
                scope.auth_prefix(),
                provider.as_str(),
                scope.state_marker()
            );
            Url::parse(&url).map_err(|e| IdentityError::Request(e.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(bool, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn success(&self, message: &str) {
            self.notices.lock().push((true, message.to_string()));
        }

        fn error(&self, message: &str) {
            self.notices.lock().push((false, message.to_string()));
        }
    }

    struct Harness {
        manager: SessionManager,
        identity: Arc<ScriptedIdentity>,
        db: Database,
        store: CookieStore,
        notifier: Arc<RecordingNotifier>,
        redirects: Arc<Mutex<Vec<Url>>>,
    }

    fn harness() -> Harness {
        let identity = Arc::new(ScriptedIdentity::default());
        let db = Database::open_in_memory().unwrap();
        let store = CookieStore::with_defaults(db.clone());
        let notifier = Arc::new(RecordingNotifier::default());
        let redirects = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&redirects);
        let navigator = move |url: &Url| sink.lock().push(url.clone());

        let manager = SessionManager::new(
            identity.clone(),
            Arc::new(store.clone()),
            Arc::new(navigator),
        )
        .with_notifier(notifier.clone());

        Harness {
            manager,
            identity,
            db,
            store,
            notifier,
            redirects,
        }
    }

    fn ok_envelope() -> ApiResponse<Value> {
        ApiResponse {
            success: true,
            message: None,
            data: None,
            token: None,
        }
    }

    fn user_record(id: &str, role: Role) -> UserRecord {
        UserRecord {
            id: Some(id.to_string()),
            name: Some("Ada".to_string()),
            email: Some("a@x.com".to_string()),
            role: Some(role),
            is_email_verified: Some(true),
            method: Some(AuthMethod::Local),
        }
    }

    fn login_response(token: &str, role: Role) -> LoginResponse {
        LoginResponse {
            credential: Credential::new(token),
            user: user_record("u1", role),
            message: None,
        }
    }

    #[tokio::test]
    async fn test_restore_without_credential() {
        let h = harness();
        assert_eq!(h.manager.state(), SessionState::initial());

        let state = h.manager.restore().await;

        assert_eq!(
            state,
            SessionState {
                user: None,
                loading: false
            }
        );
        assert!(h.identity.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_valid_credential() {
        let h = harness();
        h.store.set("stored-token", Duration::days(7)).unwrap();
        h.identity
            .current_user
            .lock()
            .push_back(Ok(user_record("u1", Role::User)));

        let state = h.manager.restore().await;

        assert!(!state.loading);
        assert_eq!(state.user.unwrap().id, "u1");
        assert!(h.manager.credential_present());
        assert_eq!(
            h.identity.calls(),
            vec![("current_user".to_string(), Some("stored-token".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_restore_rejected_credential_signs_out() {
        let h = harness();
        h.store.set("expired-token", Duration::days(7)).unwrap();
        h.identity
            .current_user
            .lock()
            .push_back(Err(IdentityError::rejected(Some(401), Some("jwt expired".to_string()))));

        let state = h.manager.restore().await;

        assert_eq!(state.user, None);
        assert!(!state.loading);
        assert_eq!(h.store.get().unwrap(), None);
        assert!(!h.manager.credential_present());
    }

    #[tokio::test]
    async fn test_restore_network_failure_signs_out() {
        let h = harness();
        h.store.set("token", Duration::days(7)).unwrap();

        // Nothing scripted: the service never answers
        let state = h.manager.restore().await;

        assert_eq!(state.user, None);
        assert!(!state.loading);
        assert_eq!(h.store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_oauth_user_is_verified() {
        let h = harness();
        let token = token_with(json!({ "id": "u1", "method": "google" }));
        h.store.set(&token, Duration::days(7)).unwrap();
        h.identity.current_user.lock().push_back(Ok(UserRecord {
            id: Some("u1".to_string()),
            name: Some("Ada".to_string()),
            email: Some("a@x.com".to_string()),
            ..UserRecord::default()
        }));

        let user = h.manager.restore().await.user.unwrap();

        assert!(user.is_email_verified);
        assert_eq!(user.method, Some(AuthMethod::Google));
    }

    #[tokio::test]
    async fn test_restore_fills_gaps_from_claims() {
        let h = harness();
        let token = token_with(json!({ "id": "u7", "email": "claims@x.com", "role": "admin" }));
        h.store.set(&token, Duration::days(7)).unwrap();
        h.identity.current_user.lock().push_back(Ok(UserRecord {
            name: Some("Ada".to_string()),
            ..UserRecord::default()
        }));

        let user = h.manager.restore().await.user.unwrap();

        assert_eq!(user.id, "u7");
        assert_eq!(user.email, "claims@x.com");
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_restore_tolerates_opaque_credential() {
        let h = harness();
        h.store.set("not-a-jwt", Duration::days(7)).unwrap();
        h.identity
            .current_user
            .lock()
            .push_back(Ok(user_record("u1", Role::User)));

        let state = h.manager.restore().await;
        assert_eq!(state.user.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_restore_user_without_id_signs_out() {
        let h = harness();
        h.store.set("not-a-jwt", Duration::days(7)).unwrap();
        h.identity
            .current_user
            .lock()
            .push_back(Ok(UserRecord::default()));

        let state = h.manager.restore().await;

        assert_eq!(state.user, None);
        assert_eq!(h.store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_discards_unreadable_credential() {
        let h = harness();
        h.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO cookies (name, path, value, expires_at, created_at)
                 VALUES ('token', '/', 'stored-token', 'not-a-date', 'not-a-date')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(h.store.get().is_err());

        let state = h.manager.restore().await;

        assert_eq!(state.user, None);
        assert!(!state.loading);
        assert_eq!(h.store.get().unwrap(), None);
        assert!(h.identity.calls().is_empty());

        let rows: i64 = h
            .db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM cookies", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_login_ignores_token_claims() {
        let h = harness();
        let token = token_with(json!({ "id": "u1", "role": "admin", "method": "google" }));
        h.identity.login.lock().push_back(Ok(LoginResponse {
            credential: Credential::new(token),
            user: UserRecord {
                id: Some("u1".to_string()),
                email: Some("a@x.com".to_string()),
                ..UserRecord::default()
            },
            message: None,
        }));

        let user = h.manager.login("a@x.com", "p", false).await.unwrap();

        assert_eq!(user.role, Role::User);
        assert_eq!(user.method, None);
        assert!(!user.is_email_verified);
        assert!(!h.manager.state().is_admin());
    }

    #[tokio::test]
    async fn test_login_persists_and_attaches_credential() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("fresh-token", Role::User)));
        h.identity.resend.lock().push_back(Ok(ok_envelope()));

        let user = h.manager.login("a@x.com", "p", false).await.unwrap();

        assert_eq!(user.role, Role::User);
        assert_eq!(h.manager.current_user(), Some(user));
        assert_eq!(h.store.get().unwrap().as_deref(), Some("fresh-token"));

        // Later requests carry the new credential
        h.manager.resend_otp("a@x.com").await.unwrap();
        let calls = h.identity.calls();
        assert_eq!(calls[0], ("login".to_string(), None));
        assert_eq!(
            calls[1],
            (
                "resend_verification".to_string(),
                Some("fresh-token".to_string())
            )
        );
    }

    #[tokio::test]
    async fn test_admin_login_forces_admin_role() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("admin-token", Role::User)));

        let user = h.manager.login("a@x.com", "p", true).await.unwrap();

        assert_eq!(user.role, Role::Admin);
        assert!(h.manager.state().is_admin());
        assert_eq!(h.identity.calls()[0].0, "admin_login");
    }

    #[tokio::test]
    async fn test_login_failure_messages() {
        let h = harness();
        h.identity.login.lock().push_back(Err(IdentityError::rejected(
            Some(401),
            Some("Invalid credentials".to_string()),
        )));
        h.identity
            .login
            .lock()
            .push_back(Err(IdentityError::rejected(Some(500), None)));

        let err = h.manager.login("a@x.com", "bad", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");

        let err = h.manager.login("a@x.com", "bad", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed");

        // Unscripted: no response
        let err = h.manager.login("a@x.com", "bad", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed");

        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_service_fails() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("token", Role::User)));
        h.manager.login("a@x.com", "p", false).await.unwrap();

        // Logout unscripted: the request fails
        h.manager.logout().await;

        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.store.get().unwrap(), None);
        assert!(!h.manager.credential_present());
        assert_eq!(
            h.notifier.notices.lock().clone(),
            vec![(false, "Logout failed".to_string())]
        );
        assert_eq!(
            h.identity.calls().last().cloned(),
            Some(("logout".to_string(), Some("token".to_string())))
        );
    }

    #[tokio::test]
    async fn test_logout_twice_is_idempotent() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("token", Role::User)));
        h.identity.logout.lock().push_back(Ok(ok_envelope()));
        h.manager.login("a@x.com", "p", false).await.unwrap();

        h.manager.logout().await;
        h.manager.logout().await;

        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.store.get().unwrap(), None);
        assert_eq!(
            h.notifier.notices.lock().clone(),
            vec![
                (true, "Logged out successfully".to_string()),
                (false, "Logout failed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_logout_still_tears_down() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("token", Role::User)));
        h.manager.login("a@x.com", "p", false).await.unwrap();

        // The service never answers while the sender is alive
        let (_hold, gate) = oneshot::channel::<()>();
        *h.identity.logout_gate.lock() = Some(gate);

        let pending = Box::pin(h.manager.logout());
        let finished = futures_poll_once(pending).await;

        assert!(!finished);
        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.store.get().unwrap(), None);
        assert!(h.notifier.notices.lock().is_empty());
    }

    /// Poll a future a single time and drop it
    async fn futures_poll_once<F: Future + Unpin>(mut fut: F) -> bool {
        std::future::poll_fn(|cx| {
            let ready = std::pin::Pin::new(&mut fut).poll(cx).is_ready();
            std::task::Poll::Ready(ready)
        })
        .await
    }

    #[tokio::test]
    async fn test_stale_login_does_not_override_newer_logout() {
        let h = harness();
        let (release, gate) = oneshot::channel();
        *h.identity.login_gate.lock() = Some(gate);
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("late-token", Role::User)));
        h.identity.logout.lock().push_back(Ok(ok_envelope()));

        let manager = h.manager.clone();
        let login = tokio::spawn(async move { manager.login("a@x.com", "p", false).await });

        // Wait until the login request is in flight
        while h.identity.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        h.manager.logout().await;
        release.send(()).unwrap();

        let result = login.await.unwrap();
        assert!(matches!(result, Err(SessionError::Superseded)));
        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_superseded_logout_sends_no_success_notice() {
        let h = harness();
        let (release, gate) = oneshot::channel();
        *h.identity.logout_gate.lock() = Some(gate);
        h.identity.logout.lock().push_back(Ok(ok_envelope()));
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("new-token", Role::User)));

        let manager = h.manager.clone();
        let logout = tokio::spawn(async move { manager.logout().await });

        // Wait until the logout request is in flight
        while h.identity.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        h.manager.login("a@x.com", "p", false).await.unwrap();
        release.send(()).unwrap();
        logout.await.unwrap();

        assert_eq!(h.manager.current_user().map(|u| u.id), Some("u1".to_string()));
        assert_eq!(h.store.get().unwrap().as_deref(), Some("new-token"));
        assert!(h.manager.credential_present());
        assert!(h.notifier.notices.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stale_restore_still_clears_loading() {
        let h = harness();
        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("token", Role::User)));

        // A login committed with a newer ticket than a restore that resolves afterwards
        let restore_ticket = h.manager.ticket();
        h.manager.login("a@x.com", "p", false).await.unwrap();
        let committed = h.manager.commit_or_log(restore_ticket, "restore", |_, state| {
            state.user = None;
            Ok(())
        });
        drop(LoadingGuard {
            manager: &h.manager,
        });

        assert!(!committed);
        let state = h.manager.state();
        assert!(!state.loading);
        assert!(state.user.is_some());
    }

    #[tokio::test]
    async fn test_loading_never_returns() {
        let h = harness();
        let mut rx = h.manager.subscribe();
        h.manager.restore().await;
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().loading);

        h.identity
            .login
            .lock()
            .push_back(Ok(login_response("token", Role::User)));
        h.manager.login("a@x.com", "p", false).await.unwrap();

        let state = rx.borrow_and_update().clone();
        assert!(!state.loading);
        assert!(state.user.is_some());
    }

    #[tokio::test]
    async fn test_oauth_redirect() {
        let h = harness();

        h.manager.login_with_oauth(OAuthProvider::Google, false);
        h.manager.login_with_oauth(OAuthProvider::Facebook, true);

        let redirects = h.redirects.lock().clone();
        assert_eq!(
            redirects[0].as_str(),
            "https://id.example.com/auth/google?state=user"
        );
        assert_eq!(
            redirects[1].as_str(),
            "https://id.example.com/auth/admin/facebook?state=admin"
        );
        assert!(h.identity.calls().is_empty());
        assert_eq!(h.manager.state(), SessionState::initial());
    }

    #[tokio::test]
    async fn test_register_returns_raw_response() {
        let h = harness();
        h.identity.register.lock().push_back(Ok(ApiResponse {
            success: true,
            message: Some("Check your inbox".to_string()),
            data: Some(json!({ "email": "a@x.com" })),
            token: None,
        }));

        let response = h
            .manager
            .register("ada", "a@x.com", "p", true)
            .await
            .unwrap();

        assert_eq!(response.message.as_deref(), Some("Check your inbox"));
        assert_eq!(h.identity.calls()[0].0, "admin_register");
        assert_eq!(h.manager.current_user(), None);

        let err = h
            .manager
            .register("ada", "a@x.com", "p", false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Registration failed");
    }

    #[tokio::test]
    async fn test_verify_email_trims_and_propagates_message() {
        let h = harness();
        h.identity
            .verify
            .lock()
            .push_back(Err(IdentityError::rejected(Some(200), Some("Code expired".to_string()))));

        let err = h
            .manager
            .verify_email("a@x.com", " 123456 ")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Code expired");
        assert_eq!(h.identity.otps.lock().clone(), vec!["123456".to_string()]);
        assert_eq!(h.manager.state(), SessionState::initial());
    }

    #[tokio::test]
    async fn test_verify_email_error_taxonomy() {
        let h = harness();
        h.identity
            .verify
            .lock()
            .push_back(Err(IdentityError::rejected(Some(400), None)));
        h.identity
            .verify
            .lock()
            .push_back(Err(IdentityError::NoResponse("timeout".to_string())));
        h.identity
            .verify
            .lock()
            .push_back(Err(IdentityError::Request("bad url".to_string())));
        h.identity.verify.lock().push_back(Ok(ok_envelope()));

        let messages: Vec<String> = vec![
            h.manager.verify_email("a@x.com", "1").await.unwrap_err().to_string(),
            h.manager.verify_email("a@x.com", "1").await.unwrap_err().to_string(),
            h.manager.verify_email("a@x.com", "1").await.unwrap_err().to_string(),
        ];
        assert_eq!(
            messages,
            vec![
                "Invalid or expired OTP",
                "Network error. Please try again.",
                "Verification failed. Please try again.",
            ]
        );

        assert!(h.manager.verify_email("a@x.com", "1").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_resend_otp_error_taxonomy() {
        let h = harness();
        h.identity
            .resend
            .lock()
            .push_back(Err(IdentityError::rejected(Some(429), Some("Too many requests".to_string()))));
        h.identity
            .resend
            .lock()
            .push_back(Err(IdentityError::rejected(Some(400), None)));
        h.identity
            .resend
            .lock()
            .push_back(Err(IdentityError::Request("bad url".to_string())));

        let err = h.manager.resend_otp("a@x.com").await.unwrap_err();
        assert_eq!(err.to_string(), "Too many requests");

        let err = h.manager.resend_otp("a@x.com").await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to resend OTP");

        let err = h.manager.resend_otp("a@x.com").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not send verification request. Please try again."
        );

        // Unscripted: the request never receives a response
        let err = h.manager.resend_otp("a@x.com").await.unwrap_err();
        assert_eq!(err, AuthError::Network("Network error. Please try again.".to_string()));
    }
}
