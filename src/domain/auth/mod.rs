//! Auth domain - sessions, users, transition events and the error model.
//!
//! These types have no backend dependencies. Any identity service can
//! populate them through the `AuthCapability` port.

mod error;
mod events;
mod session;

pub use error::{
    AuthError, AuthErrorKind, AuthResult, AUTH_DISABLED_MESSAGE, AUTH_DISABLED_STATUS,
    TRANSPORT_FAILURE_STATUS,
};
pub use events::{AuthChangeEvent, AuthChangeKind};
pub use session::{
    AuthSession, Credentials, ExternalProvider, OAuthRedirect, OAuthSignIn, Session, User,
    UserAttributes,
};
