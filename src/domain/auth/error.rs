//! Error model shared by every capability operation.
//!
//! Backends never raise across the capability boundary. Every failure is
//! reported as an [`AuthError`] carrying a human-readable message and an
//! HTTP-style status code, so callers branch on the `Err` value rather than
//! on control flow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message reported by every operation when no backend is configured.
pub const AUTH_DISABLED_MESSAGE: &str = "Auth disabled";

/// Status reported alongside [`AUTH_DISABLED_MESSAGE`].
pub const AUTH_DISABLED_STATUS: u16 = 500;

/// Status used when the backend could not be reached at all.
pub const TRANSPORT_FAILURE_STATUS: u16 = 503;

/// Result type returned by every capability operation.
pub type AuthResult<T> = Result<T, AuthError>;

/// Error returned by an identity backend.
///
/// `status` follows HTTP status semantics. Apart from the reserved
/// "disabled" pair (`"Auth disabled"`, 500) its meaning is backend-defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (status {status})")]
pub struct AuthError {
    pub message: String,
    pub status: u16,
}

/// Coarse classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No backend is configured; the operation was never attempted.
    Disabled,
    /// Network or timeout failure talking to the backend.
    Transport,
    /// The backend refused the request (bad credentials, policy, etc.).
    Rejected,
}

impl AuthError {
    /// Creates an error with an explicit status.
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// The error every operation resolves to when no backend is configured.
    pub fn disabled() -> Self {
        Self::new(AUTH_DISABLED_MESSAGE, AUTH_DISABLED_STATUS)
    }

    /// Creates a transport failure error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(message, TRANSPORT_FAILURE_STATUS)
    }

    /// Creates a rejection error with the backend-reported status.
    pub fn rejected(message: impl Into<String>, status: u16) -> Self {
        Self::new(message, status)
    }

    /// Creates a 401 error for operations that need a current session.
    pub fn not_authenticated() -> Self {
        Self::new("Auth session missing", 401)
    }

    /// Classifies this error.
    pub fn kind(&self) -> AuthErrorKind {
        if self.is_disabled() {
            AuthErrorKind::Disabled
        } else if matches!(self.status, 0 | 502 | TRANSPORT_FAILURE_STATUS | 504) {
            AuthErrorKind::Transport
        } else {
            AuthErrorKind::Rejected
        }
    }

    /// Returns true if this is the "no backend configured" error.
    pub fn is_disabled(&self) -> bool {
        self.status == AUTH_DISABLED_STATUS && self.message == AUTH_DISABLED_MESSAGE
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        self.kind() == AuthErrorKind::Transport
    }

    /// Returns true if this error indicates the user should sign in again.
    pub fn requires_reauthentication(&self) -> bool {
        self.status == 401
    }
}
