//! Session and user value objects.
//!
//! A [`Session`] is issued by the identity backend and is never patched in
//! place: every transition replaces it wholesale. The [`User`] a caller sees
//! is always the one embedded in the current session.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::foundation::UserId;

/// Identity as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Backend-issued identifier.
    pub id: UserId,

    /// Contact address, when the backend has one.
    #[serde(default)]
    pub email: Option<String>,

    /// Provider-specific attributes (`user_metadata` on GoTrue).
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl User {
    pub fn new(id: UserId, email: Option<String>) -> Self {
        Self {
            id,
            email,
            attributes: HashMap::new(),
        }
    }

    /// Adds a provider-specific attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Returns an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Live proof of authentication issued by a backend.
#[derive(Clone)]
pub struct Session {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
    user: User,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: User) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::new(refresh_token.into()));
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Bearer token for backend calls made on behalf of this session.
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Copy of this session carrying a replacement user.
    pub fn replacing_user(&self, user: User) -> Session {
        Session {
            user,
            ..self.clone()
        }
    }

    /// Returns true if the session carries an expiry that has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.access_token() == other.access_token()
            && self.refresh_token() == other.refresh_token()
            && self.expires_at == other.expires_at
            && self.user == other.user
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// User and session produced by a sign-in style operation.
///
/// `session` may be absent while `user` is present, e.g. a sign-up that
/// still awaits email confirmation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSession {
    pub user: Option<User>,
    pub session: Option<Session>,
}

impl AuthSession {
    /// Builds the pair from a session, deriving the user from it.
    pub fn from_session(session: Session) -> Self {
        Self {
            user: Some(session.user().clone()),
            session: Some(session),
        }
    }

    /// A user without an established session.
    pub fn pending(user: User) -> Self {
        Self {
            user: Some(user),
            session: None,
        }
    }
}

/// Email/password credentials for sign-in and sign-up.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: SecretString,
    /// Extra attributes stored on the user at sign-up.
    pub attributes: HashMap<String, Value>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::new(password.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Partial update applied by `update_user`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAttributes {
    pub email: Option<String>,
    pub attributes: HashMap<String, Value>,
}

impl UserAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Applies this update to a user, returning the replacement.
    pub fn apply_to(&self, user: &User) -> User {
        let mut updated = user.clone();
        if let Some(email) = &self.email {
            updated.email = Some(email.clone());
        }
        for (key, value) in &self.attributes {
            updated.attributes.insert(key.clone(), value.clone());
        }
        updated
    }
}

/// External identity provider for redirect-based sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalProvider {
    Google,
    Github,
    Other(String),
}

impl ExternalProvider {
    /// Provider named in a URL path segment. Names are case-insensitive and
    /// limited to ASCII letters, digits, `-` and `_`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return None;
        }
        Some(match name.as_str() {
            "google" => ExternalProvider::Google,
            "github" => ExternalProvider::Github,
            _ => ExternalProvider::Other(name),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            ExternalProvider::Google => "google",
            ExternalProvider::Github => "github",
            ExternalProvider::Other(name) => name,
        }
    }
}

impl fmt::Display for ExternalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to start an external-identity sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSignIn {
    pub provider: ExternalProvider,
    /// Where the backend should send the browser after authorization.
    /// Falls back to the capability's configured redirect base.
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
}

impl OAuthSignIn {
    pub fn new(provider: ExternalProvider) -> Self {
        Self {
            provider,
            redirect_to: None,
            scopes: None,
        }
    }

    pub fn google() -> Self {
        Self::new(ExternalProvider::Google)
    }

    pub fn with_redirect_to(mut self, redirect_to: impl Into<String>) -> Self {
        self.redirect_to = Some(redirect_to.into());
        self
    }

    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = Some(scopes.into());
        self
    }
}

/// Authorization URL the browser must visit to continue an external sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub provider: ExternalProvider,
    pub url: String,
    /// Handle of the pending flow, when the backend keeps per-flow state.
    /// It comes back on the callback as the `flow` query parameter.
    pub flow: Option<String>,
}
