//! Possibly-absent identity backend.
//!
//! `Capability` is the shared handle every consumer holds. Each operation is
//! dispatched with a `match`: a configured backend is called, the
//! unconfigured sentinel resolves to [`AuthError::disabled`] without any I/O.

use std::sync::Arc;

use crate::domain::auth::{
    AuthError, AuthResult, AuthSession, Credentials, OAuthRedirect, OAuthSignIn, Session, User,
    UserAttributes,
};
use crate::ports::{AuthCapability, SessionListener, Subscription};

/// A configured identity backend or the unconfigured sentinel.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone, Default)]
pub enum Capability {
    Configured(Arc<dyn AuthCapability>),
    #[default]
    Unconfigured,
}

impl Capability {
    /// Wrap a concrete backend.
    pub fn configured(backend: impl AuthCapability + 'static) -> Self {
        Self::Configured(Arc::new(backend))
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured(_))
    }

    /// Borrow the backend, if any.
    pub fn backend(&self) -> Option<&Arc<dyn AuthCapability>> {
        match self {
            Self::Configured(backend) => Some(backend),
            Self::Unconfigured => None,
        }
    }

    /// True when both handles refer to the same backend instance (or both
    /// are unconfigured).
    pub fn same_backend(&self, other: &Capability) -> bool {
        match (self, other) {
            (Self::Configured(a), Self::Configured(b)) => Arc::ptr_eq(a, b),
            (Self::Unconfigured, Self::Unconfigured) => true,
            _ => false,
        }
    }

    pub async fn get_session(&self) -> AuthResult<Option<Session>> {
        match self {
            Self::Configured(backend) => backend.get_session().await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub fn on_auth_state_change(&self, listener: SessionListener) -> AuthResult<Subscription> {
        match self {
            Self::Configured(backend) => Ok(backend.on_auth_state_change(listener)),
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        match self {
            Self::Configured(backend) => backend.sign_in(credentials).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        match self {
            Self::Configured(backend) => backend.sign_up(credentials).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn sign_in_with_oauth(&self, request: &OAuthSignIn) -> AuthResult<OAuthRedirect> {
        match self {
            Self::Configured(backend) => backend.sign_in_with_oauth(request).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        match self {
            Self::Configured(backend) => backend.sign_out().await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        match self {
            Self::Configured(backend) => backend.reset_password(email).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn update_password(&self, new_password: &str) -> AuthResult<()> {
        match self {
            Self::Configured(backend) => backend.update_password(new_password).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        match self {
            Self::Configured(backend) => backend.update_user(attributes).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn exchange_code_for_session(&self, code: &str) -> AuthResult<AuthSession> {
        match self {
            Self::Configured(backend) => backend.exchange_code_for_session(code).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }

    pub async fn exchange_code_for_flow(
        &self,
        code: &str,
        flow: Option<&str>,
    ) -> AuthResult<AuthSession> {
        match self {
            Self::Configured(backend) => backend.exchange_code_for_flow(code, flow).await,
            Self::Unconfigured => Err(AuthError::disabled()),
        }
    }
}

impl From<Arc<dyn AuthCapability>> for Capability {
    fn from(backend: Arc<dyn AuthCapability>) -> Self {
        Self::Configured(backend)
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configured(_) => f.write_str("Capability::Configured"),
            Self::Unconfigured => f.write_str("Capability::Unconfigured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::InMemoryAuthBackend;
    use crate::domain::auth::{AuthChangeEvent, AUTH_DISABLED_STATUS};

    #[tokio::test]
    async fn unconfigured_operations_are_disabled() {
        let capability = Capability::Unconfigured;
        let credentials = Credentials::new("a@example.com", "secret1");

        let errors = vec![
            capability.get_session().await.unwrap_err(),
            capability
                .on_auth_state_change(Arc::new(|_: AuthChangeEvent| {}))
                .unwrap_err(),
            capability.sign_in(&credentials).await.unwrap_err(),
            capability.sign_up(&credentials).await.unwrap_err(),
            capability
                .sign_in_with_oauth(&OAuthSignIn::google())
                .await
                .unwrap_err(),
            capability.sign_out().await.unwrap_err(),
            capability.reset_password("a@example.com").await.unwrap_err(),
            capability.update_password("secret2").await.unwrap_err(),
            capability
                .update_user(&UserAttributes::new())
                .await
                .unwrap_err(),
            capability.exchange_code_for_session("abc").await.unwrap_err(),
            capability
                .exchange_code_for_flow("abc", Some("flow"))
                .await
                .unwrap_err(),
        ];

        for error in errors {
            assert_eq!(error.message, "Auth disabled");
            assert_eq!(error.status, AUTH_DISABLED_STATUS);
        }
    }

    #[tokio::test]
    async fn configured_dispatches_to_backend() {
        let capability = Capability::configured(
            InMemoryAuthBackend::new().with_test_user("a@example.com", "secret1"),
        );

        let result = capability
            .sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        assert!(result.session.is_some());
        assert!(capability.get_session().await.unwrap().is_some());
    }

    #[test]
    fn same_backend_compares_identity() {
        let backend: Arc<dyn AuthCapability> = Arc::new(InMemoryAuthBackend::new());
        let a = Capability::from(backend.clone());
        let b = Capability::from(backend);
        let c = Capability::configured(InMemoryAuthBackend::new());

        assert!(a.same_backend(&b));
        assert!(!a.same_backend(&c));
        assert!(Capability::Unconfigured.same_backend(&Capability::default()));
        assert!(!a.same_backend(&Capability::Unconfigured));
    }
}
