//! In-memory identity backend.
//!
//! Implements the full `AuthCapability` contract without any external
//! service: accounts, the current session and one-time authorization codes
//! all live in process memory. Used by tests and by local development when
//! no GoTrue endpoint is configured but a working sign-in flow is wanted.
//!
//! # Example
//!
//! ```ignore
//! use identity_gate::adapters::auth::InMemoryAuthBackend;
//!
//! let backend = InMemoryAuthBackend::new()
//!     .with_test_user("alice@example.com", "correct-horse");
//!
//! let result = backend
//!     .sign_in(&Credentials::new("alice@example.com", "correct-horse"))
//!     .await;
//! assert!(result.is_ok());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::ChangeNotifier;
use crate::domain::auth::{
    AuthChangeEvent, AuthError, AuthResult, AuthSession, Credentials, OAuthRedirect, OAuthSignIn,
    Session, User, UserAttributes,
};
use crate::domain::foundation::UserId;
use crate::ports::{AuthCapability, SessionListener, Subscription};

const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

/// In-memory implementation of [`AuthCapability`].
///
/// Emits the same change events a real backend would: `SignedIn` on
/// sign-in/sign-up/code exchange, `SignedOut` on sign-out, `UserUpdated` on
/// password or attribute changes.
pub struct InMemoryAuthBackend {
    /// Accounts keyed by lower-cased email
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<Session>>,
    /// One-time authorization codes mapped to the account email they sign in
    codes: RwLock<HashMap<String, String>>,
    password_resets: RwLock<Vec<String>>,
    /// Optional error to return from every operation (for error testing)
    force_error: RwLock<Option<AuthError>>,
    require_email_confirmation: bool,
    get_session_delay: Option<Duration>,
    get_session_calls: AtomicUsize,
    authorize_base: String,
    notifier: ChangeNotifier,
}

impl Default for InMemoryAuthBackend {
    fn default() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            codes: RwLock::new(HashMap::new()),
            password_resets: RwLock::new(Vec::new()),
            force_error: RwLock::new(None),
            require_email_confirmation: false,
            get_session_delay: None,
            get_session_calls: AtomicUsize::new(0),
            authorize_base: "http://localhost/auth/v1/authorize".to_string(),
            notifier: ChangeNotifier::new(),
        }
    }
}

impl InMemoryAuthBackend {
    /// Creates an empty backend with no accounts and no session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account for `user`.
    pub fn with_user(self, user: User, password: impl Into<String>) -> Self {
        self.add_user(user, password);
        self
    }

    /// Adds an account with a generated id for `email`.
    pub fn with_test_user(self, email: impl Into<String>, password: impl Into<String>) -> Self {
        let email = email.into();
        let user = User::new(new_user_id(), Some(email));
        self.with_user(user, password)
    }

    /// Starts the backend with an already established session.
    pub fn with_session(self, session: Session) -> Self {
        *write(&self.current) = Some(session);
        self
    }

    /// Forces every operation to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *write(&self.force_error) = Some(error);
        self
    }

    /// Makes sign-up return a user without a session.
    pub fn with_email_confirmation(mut self) -> Self {
        self.require_email_confirmation = true;
        self
    }

    /// Delays every `get_session` response without changing its content.
    pub fn with_get_session_delay(mut self, delay: Duration) -> Self {
        self.get_session_delay = Some(delay);
        self
    }

    /// Base URL used when building authorization redirects.
    pub fn with_authorize_base(mut self, base: impl Into<String>) -> Self {
        self.authorize_base = base.into();
        self
    }

    /// Clears the forced error and returns to normal operation.
    pub fn clear_error(&self) {
        *write(&self.force_error) = None;
    }

    /// Adds an account at runtime.
    pub fn add_user(&self, user: User, password: impl Into<String>) {
        let key = account_key(user.email.as_deref().unwrap_or_else(|| user.id.as_str()));
        write(&self.accounts).insert(
            key,
            Account {
                user,
                password: password.into(),
            },
        );
    }

    /// Registers a known one-time authorization code for `email`.
    pub fn with_authorization_code(self, code: impl Into<String>, email: &str) -> Self {
        write(&self.codes).insert(code.into(), account_key(email));
        self
    }

    /// Issues a one-time authorization code that signs in `email`.
    pub fn issue_authorization_code(&self, email: &str) -> String {
        let code = Uuid::new_v4().simple().to_string();
        write(&self.codes).insert(code.clone(), account_key(email));
        code
    }

    /// Simulates a backend-initiated transition (refresh, external
    /// invalidation, another tab signing in).
    pub fn push_change(&self, event: AuthChangeEvent) {
        self.transition(event);
    }

    /// Simulates a token refresh of the current session.
    pub fn refresh_session(&self) -> Option<Session> {
        let refreshed = read(&self.current)
            .as_ref()
            .map(|session| issue_session(session.user().clone()));
        if let Some(session) = &refreshed {
            self.push_change(AuthChangeEvent::token_refreshed(session.clone()));
        }
        refreshed
    }

    /// Simulates the backend revoking the current session.
    pub fn invalidate_session(&self) {
        self.push_change(AuthChangeEvent::signed_out());
    }

    /// Emails that requested a password reset, in request order.
    pub fn password_reset_requests(&self) -> Vec<String> {
        read(&self.password_resets).clone()
    }

    /// Number of `get_session` calls served.
    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    /// Number of live change listeners.
    pub fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }

    /// Returns the number of registered accounts.
    pub fn user_count(&self) -> usize {
        read(&self.accounts).len()
    }

    fn check_forced_error(&self) -> AuthResult<()> {
        match read(&self.force_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn current_session(&self) -> AuthResult<Session> {
        read(&self.current)
            .clone()
            .ok_or_else(AuthError::not_authenticated)
    }

    /// Stores the event's session and queues the event while still holding
    /// the store's write guard, so event order always matches store order.
    fn transition(&self, event: AuthChangeEvent) {
        let mut current = write(&self.current);
        *current = event.session.clone();
        self.notifier.notify(event);
    }

    fn establish(&self, user: User) -> AuthSession {
        let session = issue_session(user);
        self.transition(AuthChangeEvent::signed_in(session.clone()));
        AuthSession::from_session(session)
    }

    fn replace_user(&self, session: &Session, user: User) -> Session {
        let updated = session.replacing_user(user);
        self.transition(AuthChangeEvent::user_updated(updated.clone()));
        updated
    }
}

#[async_trait]
impl AuthCapability for InMemoryAuthBackend {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        // The answer is fixed when the request arrives; the delay models a
        // slow response, so transitions during it are not reflected.
        let answer = self.check_forced_error().map(|_| read(&self.current).clone());
        if let Some(delay) = self.get_session_delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    fn on_auth_state_change(&self, listener: SessionListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        self.check_forced_error()?;

        let account = read(&self.accounts)
            .get(&account_key(&credentials.email))
            .cloned();
        match account {
            Some(account) if account.password == credentials.password() => {
                tracing::debug!(user_id = %account.user.id, "in-memory sign-in");
                Ok(self.establish(account.user))
            }
            _ => Err(AuthError::rejected("Invalid login credentials", 400)),
        }
    }

    async fn sign_up(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        self.check_forced_error()?;

        if !credentials.email.contains('@') {
            return Err(AuthError::rejected(
                "Unable to validate email address: invalid format",
                400,
            ));
        }
        if credentials.password().len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::rejected(
                "Password should be at least 6 characters.",
                422,
            ));
        }

        let key = account_key(&credentials.email);
        let user = {
            let mut accounts = write(&self.accounts);
            if accounts.contains_key(&key) {
                return Err(AuthError::rejected("User already registered", 422));
            }
            let user = User {
                id: new_user_id(),
                email: Some(credentials.email.clone()),
                attributes: credentials.attributes.clone(),
            };
            accounts.insert(
                key,
                Account {
                    user: user.clone(),
                    password: credentials.password().to_string(),
                },
            );
            user
        };

        if self.require_email_confirmation {
            return Ok(AuthSession::pending(user));
        }
        Ok(self.establish(user))
    }

    async fn sign_in_with_oauth(&self, request: &OAuthSignIn) -> AuthResult<OAuthRedirect> {
        self.check_forced_error()?;

        let mut url = format!(
            "{}?provider={}",
            self.authorize_base,
            urlencoding::encode(request.provider.as_str())
        );
        if let Some(redirect_to) = &request.redirect_to {
            url.push_str("&redirect_to=");
            url.push_str(&urlencoding::encode(redirect_to));
        }
        if let Some(scopes) = &request.scopes {
            url.push_str("&scopes=");
            url.push_str(&urlencoding::encode(scopes));
        }

        Ok(OAuthRedirect {
            provider: request.provider.clone(),
            url,
            flow: None,
        })
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.check_forced_error()?;

        self.transition(AuthChangeEvent::signed_out());
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> AuthResult<()> {
        self.check_forced_error()?;

        if !email.contains('@') {
            return Err(AuthError::rejected(
                "Unable to validate email address: invalid format",
                400,
            ));
        }
        // Unknown addresses succeed too, so accounts cannot be enumerated.
        write(&self.password_resets).push(email.to_string());
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> AuthResult<()> {
        self.check_forced_error()?;

        let session = self.current_session()?;
        if new_password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::rejected(
                "Password should be at least 6 characters.",
                422,
            ));
        }

        {
            let mut accounts = write(&self.accounts);
            let account = accounts
                .values_mut()
                .find(|account| account.user.id == session.user().id)
                .ok_or_else(|| AuthError::rejected("User not found", 404))?;
            account.password = new_password.to_string();
        }

        self.replace_user(&session, session.user().clone());
        Ok(())
    }

    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        self.check_forced_error()?;

        let session = self.current_session()?;
        let updated = attributes.apply_to(session.user());

        {
            let mut accounts = write(&self.accounts);
            let old_key = accounts
                .iter()
                .find(|(_, account)| account.user.id == session.user().id)
                .map(|(key, _)| key.clone())
                .ok_or_else(|| AuthError::rejected("User not found", 404))?;
            let new_key = account_key(updated.email.as_deref().unwrap_or(&old_key));
            if new_key != old_key && accounts.contains_key(&new_key) {
                return Err(AuthError::rejected(
                    "A user with this email address has already been registered",
                    422,
                ));
            }
            if let Some(mut account) = accounts.remove(&old_key) {
                account.user = updated.clone();
                accounts.insert(new_key, account);
            }
        }

        self.replace_user(&session, updated.clone());
        Ok(updated)
    }

    async fn exchange_code_for_session(&self, code: &str) -> AuthResult<AuthSession> {
        self.check_forced_error()?;

        let email = write(&self.codes).remove(code).ok_or_else(|| {
            AuthError::rejected("invalid flow state, no valid flow state found", 404)
        })?;
        let account = read(&self.accounts)
            .get(&email)
            .cloned()
            .ok_or_else(|| AuthError::rejected("User not found", 404))?;

        Ok(self.establish(account.user))
    }
}

fn new_user_id() -> UserId {
    UserId::new(Uuid::new_v4().to_string()).unwrap_or_else(|_| unreachable!("uuid is never empty"))
}

fn issue_session(user: User) -> Session {
    Session::new(Uuid::new_v4().simple().to_string(), user)
        .with_refresh_token(Uuid::new_v4().simple().to_string())
}

fn account_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::AuthChangeKind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn backend() -> InMemoryAuthBackend {
        InMemoryAuthBackend::new().with_test_user("alice@example.com", "correct-horse")
    }

    fn alice() -> Credentials {
        Credentials::new("alice@example.com", "correct-horse")
    }

    fn record(backend: &InMemoryAuthBackend) -> (Subscription, Arc<Mutex<Vec<AuthChangeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = backend.on_auth_state_change(Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        }));
        (subscription, events)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Credential operations
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn sign_in_then_get_session_returns_same_user() {
        let backend = backend();

        let signed_in = backend.sign_in(&alice()).await.unwrap();
        let session = backend.get_session().await.unwrap().unwrap();

        assert_eq!(Some(session.user()), signed_in.user.as_ref());
        assert_eq!(Some(&session), signed_in.session.as_ref());
    }

    #[tokio::test]
    async fn sign_in_with_wrong_password_is_rejected() {
        let backend = backend();

        let err = backend
            .sign_in(&Credentials::new("alice@example.com", "wrong"))
            .await
            .unwrap_err();

        assert_eq!(err.message, "Invalid login credentials");
        assert_eq!(err.status, 400);
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_in_email_is_case_insensitive() {
        let backend = backend();
        let result = backend
            .sign_in(&Credentials::new("Alice@Example.com", "correct-horse"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sign_up_creates_account_and_session() {
        let backend = InMemoryAuthBackend::new();
        let credentials =
            Credentials::new("bob@example.com", "secret-pw").with_attribute("name", json!("Bob"));

        let result = backend.sign_up(&credentials).await.unwrap();

        let user = result.user.unwrap();
        assert_eq!(user.email.as_deref(), Some("bob@example.com"));
        assert_eq!(user.attribute("name"), Some(&json!("Bob")));
        assert!(result.session.is_some());
        assert_eq!(backend.user_count(), 1);
    }

    #[tokio::test]
    async fn sign_up_with_confirmation_returns_user_without_session() {
        let backend = InMemoryAuthBackend::new().with_email_confirmation();

        let result = backend
            .sign_up(&Credentials::new("bob@example.com", "secret-pw"))
            .await
            .unwrap();

        assert!(result.user.is_some());
        assert!(result.session.is_none());
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicate_and_short_password() {
        let backend = backend();

        let duplicate = backend.sign_up(&alice()).await.unwrap_err();
        assert_eq!(duplicate.status, 422);

        let short = backend
            .sign_up(&Credentials::new("new@example.com", "123"))
            .await
            .unwrap_err();
        assert_eq!(short.status, 422);
    }

    #[tokio::test]
    async fn sign_out_clears_session() {
        let backend = backend();
        backend.sign_in(&alice()).await.unwrap();

        backend.sign_out().await.unwrap();

        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_password_records_request_even_for_unknown_email() {
        let backend = backend();

        backend.reset_password("alice@example.com").await.unwrap();
        backend.reset_password("nobody@example.com").await.unwrap();

        assert_eq!(
            backend.password_reset_requests(),
            vec!["alice@example.com", "nobody@example.com"]
        );
    }

    #[tokio::test]
    async fn update_password_requires_session() {
        let backend = backend();

        let err = backend.update_password("new-password").await.unwrap_err();

        assert_eq!(err.status, 401);
    }

    #[tokio::test]
    async fn update_password_changes_credentials() {
        let backend = backend();
        backend.sign_in(&alice()).await.unwrap();

        backend.update_password("new-password").await.unwrap();
        backend.sign_out().await.unwrap();

        assert!(backend.sign_in(&alice()).await.is_err());
        assert!(backend
            .sign_in(&Credentials::new("alice@example.com", "new-password"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_user_replaces_session_user() {
        let backend = backend();
        backend.sign_in(&alice()).await.unwrap();

        let updated = backend
            .update_user(&UserAttributes::new().with_attribute("theme", json!("dark")))
            .await
            .unwrap();

        let session = backend.get_session().await.unwrap().unwrap();
        assert_eq!(session.user(), &updated);
        assert_eq!(updated.attribute("theme"), Some(&json!("dark")));
    }

    #[tokio::test]
    async fn sign_in_with_oauth_builds_authorize_url() {
        let backend = InMemoryAuthBackend::new().with_authorize_base("https://auth.test/authorize");

        let redirect = backend
            .sign_in_with_oauth(&OAuthSignIn::google().with_redirect_to("https://app.test/cb"))
            .await
            .unwrap();

        assert_eq!(
            redirect.url,
            "https://auth.test/authorize?provider=google&redirect_to=https%3A%2F%2Fapp.test%2Fcb"
        );
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Code exchange
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn exchange_code_is_single_use() {
        let backend = backend();
        let code = backend.issue_authorization_code("alice@example.com");

        let first = backend.exchange_code_for_session(&code).await;
        let second = backend.exchange_code_for_session(&code).await;

        assert!(first.unwrap().session.is_some());
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn exchange_unknown_code_fails() {
        let backend = backend();
        assert!(backend.exchange_code_for_session("nope").await.is_err());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Forced errors and events
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn with_error_forces_error_everywhere() {
        let backend = backend().with_error(AuthError::transport("offline"));

        assert!(backend.get_session().await.unwrap_err().is_transient());
        assert!(backend.sign_in(&alice()).await.unwrap_err().is_transient());
        assert!(backend.sign_out().await.unwrap_err().is_transient());

        backend.clear_error();
        assert!(backend.sign_in(&alice()).await.is_ok());
    }

    #[tokio::test]
    async fn operations_emit_change_events() {
        let backend = backend();
        let (_subscription, events) = record(&backend);

        backend.sign_in(&alice()).await.unwrap();
        backend
            .update_user(&UserAttributes::new().with_attribute("a", json!(1)))
            .await
            .unwrap();
        backend.sign_out().await.unwrap();
        settle().await;

        let kinds: Vec<_> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AuthChangeKind::SignedIn,
                AuthChangeKind::UserUpdated,
                AuthChangeKind::SignedOut
            ]
        );
    }

    #[tokio::test]
    async fn refresh_and_invalidate_push_events() {
        let backend = backend();
        backend.sign_in(&alice()).await.unwrap();
        let (_subscription, events) = record(&backend);

        let refreshed = backend.refresh_session().unwrap();
        backend.invalidate_session();
        settle().await;

        let events = events.lock().unwrap().clone();
        assert_eq!(events[0], AuthChangeEvent::token_refreshed(refreshed));
        assert_eq!(events[1], AuthChangeEvent::signed_out());
        assert!(backend.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_session_counts_calls() {
        let backend = backend();
        backend.get_session().await.unwrap();
        backend.get_session().await.unwrap();
        assert_eq!(backend.get_session_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_transitions_end_on_the_stored_session() {
        let backend = Arc::new(backend());
        let (_subscription, events) = record(&backend);
        let user = User::new(UserId::new("user-1").unwrap(), None);

        std::thread::scope(|scope| {
            for writer in 0..8 {
                let backend = Arc::clone(&backend);
                let user = user.clone();
                scope.spawn(move || {
                    for step in 0..50 {
                        let token = format!("token-{writer}-{step}");
                        backend.push_change(AuthChangeEvent::signed_in(Session::new(
                            token,
                            user.clone(),
                        )));
                    }
                });
            }
        });

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while events.lock().unwrap().len() < 400 {
            assert!(tokio::time::Instant::now() < deadline, "events not delivered");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let stored = backend.get_session().await.unwrap().unwrap();
        let last = events.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            last.session.unwrap().access_token(),
            stored.access_token()
        );
    }
}
