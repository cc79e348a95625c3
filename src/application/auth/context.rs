//! Context binding - the value application code talks to.
//!
//! `AuthProvider` owns the session controller for one running instance and
//! hands out `AuthContext` values. A context reads state from the controller
//! and forwards operations to the shared capability; with no backend every
//! operation fails with "Auth disabled" and nothing is contacted.
//!
//! Pass `AuthContext` explicitly where possible. `AuthProvider::scope`
//! additionally installs it task-locally for [`use_auth_context`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::{resolve_capability, Capability, SessionController, SessionState};
use crate::config::AppConfig;
use crate::domain::auth::{
    AuthResult, AuthSession, Credentials, OAuthRedirect, OAuthSignIn, Session, User,
    UserAttributes,
};
use crate::ports::{AuthCapability, SessionListener, Subscription};

tokio::task_local! {
    static AUTH_CONTEXT: AuthContext;
}

/// Read-only session state plus bound auth operations.
#[derive(Clone)]
pub struct AuthContext {
    capability: Capability,
    controller: Arc<SessionController>,
}

impl AuthContext {
    pub fn session(&self) -> Option<Session> {
        self.controller.snapshot().session().cloned()
    }

    pub fn user(&self) -> Option<User> {
        self.controller.snapshot().user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.controller.snapshot().is_loading()
    }

    /// True when the current session carries a user.
    pub fn is_authenticated(&self) -> bool {
        self.controller.snapshot().is_authenticated()
    }

    pub fn is_configured(&self) -> bool {
        self.capability.is_configured()
    }

    pub fn state(&self) -> SessionState {
        self.controller.snapshot()
    }

    pub fn changes(&self) -> watch::Receiver<SessionState> {
        self.controller.watch()
    }

    /// Wait for the initial session load.
    pub async fn loaded(&self) -> SessionState {
        self.controller.loaded().await
    }

    pub async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.capability.get_session().await
    }

    pub fn on_auth_state_change(&self, listener: SessionListener) -> AuthResult<Subscription> {
        self.capability.on_auth_state_change(listener)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        self.capability.sign_in(credentials).await
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        self.capability.sign_up(credentials).await
    }

    pub async fn sign_in_with_oauth(&self, request: &OAuthSignIn) -> AuthResult<OAuthRedirect> {
        self.capability.sign_in_with_oauth(request).await
    }

    /// External sign-in with Google and the configured redirect.
    pub async fn sign_in_with_google(&self) -> AuthResult<OAuthRedirect> {
        self.sign_in_with_oauth(&OAuthSignIn::google()).await
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.capability.sign_out().await
    }

    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        self.capability.reset_password(email).await
    }

    pub async fn update_password(&self, new_password: &str) -> AuthResult<()> {
        self.capability.update_password(new_password).await
    }

    pub async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        self.capability.update_user(attributes).await
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("capability", &self.capability)
            .field("state", &self.controller.snapshot())
            .finish()
    }
}

/// Owning initializer: one capability, one session controller.
pub struct AuthProvider {
    capability: Capability,
    controller: Arc<SessionController>,
}

impl AuthProvider {
    /// Start a session controller for `capability`.
    pub fn new(capability: Capability) -> Self {
        let controller = Arc::new(SessionController::start(capability.clone()));
        Self {
            capability,
            controller,
        }
    }

    /// Build the capability from configuration, preferring `custom`.
    pub fn from_config(config: &AppConfig, custom: Option<Arc<dyn AuthCapability>>) -> Self {
        let redirect_base = config.redirect_base();
        Self::new(resolve_capability(
            custom,
            &config.auth,
            redirect_base.as_deref(),
        ))
    }

    pub fn capability(&self) -> Capability {
        self.capability.clone()
    }

    pub fn context(&self) -> AuthContext {
        AuthContext {
            capability: self.capability.clone(),
            controller: Arc::clone(&self.controller),
        }
    }

    /// Run `future` with this provider's context available to
    /// [`use_auth_context`].
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        AUTH_CONTEXT.scope(self.context(), future).await
    }

    /// Release the change subscription.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

/// Context installed by the enclosing [`AuthProvider::scope`].
///
/// # Panics
///
/// Panics when called outside such a scope. That is a wiring defect, not a
/// runtime condition.
pub fn use_auth_context() -> AuthContext {
    AUTH_CONTEXT
        .try_with(AuthContext::clone)
        .unwrap_or_else(|_| panic!("use_auth_context must be used within an AuthProvider scope"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::InMemoryAuthBackend;
    use crate::domain::auth::{AuthChangeEvent, AuthError};
    use std::time::Duration;

    fn in_memory_provider() -> (Arc<InMemoryAuthBackend>, AuthProvider) {
        let backend =
            Arc::new(InMemoryAuthBackend::new().with_test_user("alice@example.com", "secret1"));
        let capability: Arc<dyn AuthCapability> = backend.clone();
        (backend, AuthProvider::new(Capability::from(capability)))
    }

    fn assert_disabled(error: AuthError) {
        assert_eq!(error.message, "Auth disabled");
        assert_eq!(error.status, 500);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Unconfigured
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unconfigured_context_is_settled_and_disabled() {
        let provider = AuthProvider::new(Capability::Unconfigured);
        let context = provider.context();

        assert!(!context.is_loading());
        assert!(!context.is_authenticated());
        assert!(!context.is_configured());
        assert!(context.session().is_none());

        let credentials = Credentials::new("alice@example.com", "secret1");
        assert_disabled(context.get_session().await.unwrap_err());
        assert_disabled(
            context
                .on_auth_state_change(Arc::new(|_: AuthChangeEvent| {}))
                .unwrap_err(),
        );
        assert_disabled(context.sign_in(&credentials).await.unwrap_err());
        assert_disabled(context.sign_up(&credentials).await.unwrap_err());
        assert_disabled(context.sign_in_with_google().await.unwrap_err());
        assert_disabled(context.sign_out().await.unwrap_err());
        assert_disabled(context.reset_password("alice@example.com").await.unwrap_err());
        assert_disabled(context.update_password("secret2").await.unwrap_err());
        assert_disabled(
            context
                .update_user(&UserAttributes::new().with_email("b@example.com"))
                .await
                .unwrap_err(),
        );
    }

    #[test]
    fn from_empty_config_is_unconfigured() {
        let provider = AuthProvider::from_config(&AppConfig::default(), None);
        assert!(!provider.capability().is_configured());
        assert!(!provider.context().is_loading());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configured
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn sign_in_then_get_session_returns_same_user() {
        let (_backend, provider) = in_memory_provider();
        let context = provider.context();
        context.loaded().await;

        let result = context
            .sign_in(&Credentials::new("alice@example.com", "secret1"))
            .await
            .unwrap();
        let session = context.get_session().await.unwrap().unwrap();

        assert_eq!(Some(session.user()), result.user.as_ref());
    }

    #[tokio::test(start_paused = true)]
    async fn context_state_follows_backend_events() {
        let (_backend, provider) = in_memory_provider();
        let context = provider.context();
        context.loaded().await;
        let mut changes = context.changes();

        context
            .sign_in(&Credentials::new("alice@example.com", "secret1"))
            .await
            .unwrap();
        changes.changed().await.unwrap();
        assert!(context.is_authenticated());

        context.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(!context.is_authenticated());
        assert!(context.user().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn from_config_prefers_custom_backend() {
        let backend: Arc<dyn AuthCapability> = Arc::new(InMemoryAuthBackend::new());
        let provider = AuthProvider::from_config(&AppConfig::default(), Some(backend.clone()));

        assert!(provider
            .capability()
            .same_backend(&Capability::from(backend)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_detaches_contexts() {
        let (backend, provider) = in_memory_provider();
        let context = provider.context();
        context.loaded().await;

        provider.shutdown();
        backend
            .sign_in(&Credentials::new("alice@example.com", "secret1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!context.is_authenticated());
        assert_eq!(backend.subscriber_count(), 0);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Task-local Access
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn use_auth_context_inside_scope() {
        let provider = AuthProvider::new(Capability::Unconfigured);

        let configured = provider
            .scope(async { use_auth_context().is_configured() })
            .await;

        assert!(!configured);
    }

    #[test]
    #[should_panic(expected = "use_auth_context must be used within an AuthProvider scope")]
    fn use_auth_context_outside_scope_panics() {
        let _ = use_auth_context();
    }
}
