//! Auth capability port - the operation set every identity backend exposes.
//!
//! Application code talks to identity backends only through this trait, so
//! swapping GoTrue for another service (or for the in-memory backend in
//! tests) never touches the session controller or the HTTP layer.
//!
//! # Contract
//!
//! Implementations must:
//! - Return every failure as `Err(AuthError)`; never panic across this boundary
//! - Read no implicit global state; all inputs are explicit parameters
//! - After a successful mutating operation, update their own session store and
//!   emit an [`AuthChangeEvent`] through the listeners registered with
//!   [`AuthCapability::on_auth_state_change`]
//! - Deliver events to each listener in the order the backend reported them
//!
//! # Example
//!
//! ```ignore
//! let capability: Arc<dyn AuthCapability> = Arc::new(InMemoryAuthBackend::new());
//!
//! let subscription = capability.on_auth_state_change(Arc::new(|event| {
//!     tracing::info!(kind = ?event.kind, "session changed");
//! }));
//!
//! let signed_in = capability
//!     .sign_in(&Credentials::new("a@example.com", "password"))
//!     .await?;
//!
//! subscription.cancel();
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::auth::{
    AuthChangeEvent, AuthResult, AuthSession, Credentials, OAuthRedirect, OAuthSignIn, Session,
    User, UserAttributes,
};
use crate::domain::foundation::SubscriptionId;

/// Callback invoked with every session transition.
pub type SessionListener = Arc<dyn Fn(AuthChangeEvent) + Send + Sync>;

/// Identity backend operations.
#[async_trait]
pub trait AuthCapability: Send + Sync {
    /// Point-in-time read of the current session. `Ok(None)` is not an error.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Registers a listener for session transitions.
    ///
    /// The returned handle cancels the registration when `cancel()` is called
    /// or when it is dropped.
    fn on_auth_state_change(&self, listener: SessionListener) -> Subscription;

    /// Signs in with email and password.
    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<AuthSession>;

    /// Registers a new account. The session may be absent until the email
    /// address is confirmed.
    async fn sign_up(&self, credentials: &Credentials) -> AuthResult<AuthSession>;

    /// Starts an external-identity sign-in and returns the authorization URL.
    async fn sign_in_with_oauth(&self, request: &OAuthSignIn) -> AuthResult<OAuthRedirect>;

    /// Ends the current session.
    async fn sign_out(&self) -> AuthResult<()>;

    /// Sends a password-reset message to `email`.
    async fn reset_password(&self, email: &str) -> AuthResult<()>;

    /// Changes the password of the signed-in user.
    async fn update_password(&self, new_password: &str) -> AuthResult<()>;

    /// Applies attribute changes to the signed-in user.
    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User>;

    /// Trades a one-time authorization code for a session.
    async fn exchange_code_for_session(&self, code: &str) -> AuthResult<AuthSession>;

    /// Trades a code for a session within the flow named by
    /// [`OAuthRedirect::flow`]. Backends without per-flow state ignore `flow`.
    async fn exchange_code_for_flow(
        &self,
        code: &str,
        flow: Option<&str>,
    ) -> AuthResult<AuthSession> {
        let _ = flow;
        self.exchange_code_for_session(code).await
    }
}

type Canceller = Box<dyn FnOnce() + Send>;

/// Cancellation handle for a listener registration.
///
/// After [`Subscription::cancel`] returns, the associated listener receives
/// no further events, including events that were already queued. Dropping
/// the handle cancels it.
pub struct Subscription {
    id: SubscriptionId,
    canceller: Mutex<Option<Canceller>>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, canceller: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            canceller: Mutex::new(Some(Box::new(canceller))),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cancels the registration. Calling it more than once is a no-op.
    pub fn cancel(&self) {
        let canceller = self
            .canceller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(canceller) = canceller {
            canceller();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
