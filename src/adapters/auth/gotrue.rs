//! GoTrue (Supabase Auth) adapter.
//!
//! Implements `AuthCapability` against the GoTrue REST API:
//!
//! 1. Password sign-in and sign-up via `/token?grant_type=password` and `/signup`
//! 2. External sign-in via a PKCE authorization URL (`/authorize`)
//! 3. Code exchange via `/token?grant_type=pkce`
//! 4. User updates via `PUT /user` with the session's bearer token
//!
//! The adapter keeps the current session in memory and publishes every
//! transition through its [`ChangeNotifier`]. Expired sessions are refreshed
//! on demand when `get_session` is called.
//!
//! Each external sign-in is a separate PKCE flow. Its verifier stays in the
//! adapter, keyed by a flow id that travels in the `redirect_to` URL as a
//! `flow` query parameter, so concurrent sign-ins never share a verifier.
//!
//! # Example
//!
//! ```ignore
//! use identity_gate::adapters::auth::{GoTrueCapability, GoTrueConfig};
//!
//! let config = GoTrueConfig::new("https://xyz.supabase.co", "anon-key")
//!     .with_redirect_url("https://app.example.com/api/auth/callback");
//! let capability = GoTrueCapability::new(config)?;
//! let session = capability.get_session().await?;
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;

use super::ChangeNotifier;
use crate::domain::auth::{
    AuthChangeEvent, AuthError, AuthResult, AuthSession, Credentials, OAuthRedirect, OAuthSignIn,
    Session, User, UserAttributes,
};
use crate::domain::foundation::UserId;
use crate::ports::{AuthCapability, SessionListener, Subscription};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a started external sign-in waits for its callback.
const FLOW_TTL: Duration = Duration::from_secs(600);

/// Query parameter carrying the flow id on the `redirect_to` URL.
pub const FLOW_PARAM: &str = "flow";

/// Errors that prevent the adapter from being constructed.
#[derive(Debug, Error)]
pub enum GoTrueSetupError {
    #[error("Required setting missing: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid auth URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Configuration for the GoTrue adapter.
#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    /// Project URL (e.g., "https://xyz.supabase.co"); `/auth/v1` is appended.
    pub url: String,

    /// Public anon key sent as the `apikey` header.
    pub anon_key: SecretString,

    /// Default `redirect_to` for external sign-in and password recovery.
    pub redirect_url: Option<String>,

    /// HTTP request timeout.
    pub timeout: Duration,
}

impl GoTrueConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: SecretString::new(anon_key.into()),
            redirect_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = Some(redirect_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL of the auth API, always ending in `/auth/v1/`.
    fn auth_base(&self) -> Result<Url, GoTrueSetupError> {
        let trimmed = self.url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(GoTrueSetupError::MissingSetting("url"));
        }
        let base = Url::parse(&format!("{}/auth/v1/", trimmed)).map_err(|e| {
            GoTrueSetupError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(GoTrueSetupError::InvalidUrl {
                url: self.url.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }
        Ok(base)
    }
}

/// Token response shared by the password, PKCE and refresh grants.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: HashMap<String, Value>,
}

/// GoTrue error bodies come in several shapes depending on the endpoint.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self, status: StatusCode) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Auth request failed")
                    .to_string()
            })
    }
}

impl TryFrom<UserResponse> for User {
    type Error = AuthError;

    fn try_from(response: UserResponse) -> Result<Self, Self::Error> {
        let id = UserId::new(response.id)
            .map_err(|_| AuthError::new("Auth server returned a user without an id", 502))?;
        Ok(User {
            id,
            email: response.email.filter(|email| !email.is_empty()),
            attributes: response.user_metadata,
        })
    }
}

impl SessionResponse {
    fn into_session(self, now: DateTime<Utc>) -> AuthResult<Session> {
        let user = User::try_from(self.user)?;
        let mut session = Session::new(self.access_token, user);
        if let Some(refresh_token) = self.refresh_token.filter(|t| !t.is_empty()) {
            session = session.with_refresh_token(refresh_token);
        }
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });
        if let Some(expires_at) = expires_at {
            session = session.with_expires_at(expires_at);
        }
        Ok(session)
    }
}

/// PKCE verifier/challenge pair (RFC 7636, S256).
fn pkce_pair() -> (String, String) {
    let verifier = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let challenge = pkce_challenge(&verifier);
    (verifier, challenge)
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Appends the flow id to a `redirect_to` target.
fn with_flow(redirect_to: &str, flow: &str) -> String {
    match Url::parse(redirect_to) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(FLOW_PARAM, flow);
            url.to_string()
        }
        Err(_) => {
            let separator = if redirect_to.contains('?') { '&' } else { '?' };
            format!(
                "{redirect_to}{separator}{FLOW_PARAM}={}",
                urlencoding::encode(flow)
            )
        }
    }
}

/// Verifier of an external sign-in awaiting its callback.
struct PendingFlow {
    verifier: String,
    started_at: Instant,
}

fn missing_verifier() -> AuthError {
    AuthError::rejected("Code verifier missing; start the sign-in flow again", 400)
}

/// GoTrue-backed identity capability.
pub struct GoTrueCapability {
    base: Url,
    anon_key: SecretString,
    redirect_url: Option<String>,
    http_client: reqwest::Client,
    session: RwLock<Option<Session>>,
    /// External sign-ins awaiting their callback, keyed by flow id
    pending_flows: Mutex<HashMap<String, PendingFlow>>,
    notifier: ChangeNotifier,
}

impl GoTrueCapability {
    /// Create a new GoTrue capability.
    ///
    /// No request is made here; the first network call happens on the first
    /// operation.
    pub fn new(config: GoTrueConfig) -> Result<Self, GoTrueSetupError> {
        let base = config.auth_base()?;
        if config.anon_key.expose_secret().trim().is_empty() {
            return Err(GoTrueSetupError::MissingSetting("anon_key"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base,
            anon_key: config.anon_key,
            redirect_url: config.redirect_url,
            http_client,
            session: RwLock::new(None),
            pending_flows: Mutex::new(HashMap::new()),
            notifier: ChangeNotifier::new(),
        })
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        self.base.join(path).map_err(|e| {
            tracing::error!("Failed to build auth endpoint {}: {}", path, e);
            AuthError::new(format!("Invalid auth endpoint: {}", e), 500)
        })
    }

    /// Sends a request with the `apikey` header and maps failures.
    async fn send(&self, request: RequestBuilder) -> AuthResult<Response> {
        let response = request
            .header("apikey", self.anon_key.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Auth request failed: {}", e);
                AuthError::transport(format!("Auth server unreachable: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body.into_message(status);
        tracing::warn!(status = status.as_u16(), %message, "Auth request rejected");
        Err(AuthError::rejected(message, status.as_u16()))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> AuthResult<T> {
        response.json::<T>().await.map_err(|e| {
            tracing::error!("Failed to parse auth response: {}", e);
            AuthError::new(format!("Invalid auth server response: {}", e), 502)
        })
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> AuthResult<Session> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .send(self.http_client.post(url).json(&body))
            .await?;
        let parsed: SessionResponse = Self::decode(response).await?;
        parsed.into_session(Utc::now())
    }

    /// Stores `session` and announces it. The event is queued before the
    /// write guard is released, so event order always matches store order.
    async fn store(&self, session: Option<Session>, event: AuthChangeEvent) {
        let mut current = self.session.write().await;
        *current = session;
        self.notifier.notify(event);
    }

    fn flows(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingFlow>> {
        self.pending_flows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a started flow and drops the ones that outlived `FLOW_TTL`.
    fn begin_flow(&self, flow: String, verifier: String) {
        let mut flows = self.flows();
        flows.retain(|_, pending| pending.started_at.elapsed() < FLOW_TTL);
        flows.insert(
            flow,
            PendingFlow {
                verifier,
                started_at: Instant::now(),
            },
        );
    }

    fn take_verifier(&self, flow: &str) -> AuthResult<String> {
        self.flows()
            .remove(flow)
            .filter(|pending| pending.started_at.elapsed() < FLOW_TTL)
            .map(|pending| pending.verifier)
            .ok_or_else(missing_verifier)
    }

    /// Verifier of the only pending flow, for callers that cannot name one.
    fn take_sole_verifier(&self) -> AuthResult<String> {
        let mut flows = self.flows();
        flows.retain(|_, pending| pending.started_at.elapsed() < FLOW_TTL);
        if flows.len() != 1 {
            return Err(missing_verifier());
        }
        let flow = flows.keys().next().cloned().ok_or_else(missing_verifier)?;
        flows
            .remove(&flow)
            .map(|pending| pending.verifier)
            .ok_or_else(missing_verifier)
    }

    async fn exchange_with_verifier(
        &self,
        code: &str,
        verifier: String,
    ) -> AuthResult<AuthSession> {
        let session = self
            .token_grant(
                "pkce",
                json!({ "auth_code": code, "code_verifier": verifier }),
            )
            .await?;

        tracing::info!(user_id = %session.user().id, "Exchanged authorization code");
        self.store(
            Some(session.clone()),
            AuthChangeEvent::signed_in(session.clone()),
        )
        .await;
        Ok(AuthSession::from_session(session))
    }

    async fn current_session(&self) -> AuthResult<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(AuthError::not_authenticated)
    }

    async fn put_user(&self, session: &Session, body: Value) -> AuthResult<User> {
        let url = self.endpoint("user")?;
        let response = self
            .send(
                self.http_client
                    .put(url)
                    .bearer_auth(session.access_token())
                    .json(&body),
            )
            .await?;
        let parsed: UserResponse = Self::decode(response).await?;
        User::try_from(parsed)
    }

    async fn refresh(&self, session: &Session) -> AuthResult<Option<Session>> {
        let Some(refresh_token) = session.refresh_token() else {
            self.store(None, AuthChangeEvent::signed_out()).await;
            return Ok(None);
        };

        match self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(refreshed) => {
                tracing::debug!(user_id = %refreshed.user().id, "Session refreshed");
                self.store(
                    Some(refreshed.clone()),
                    AuthChangeEvent::token_refreshed(refreshed.clone()),
                )
                .await;
                Ok(Some(refreshed))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::info!("Refresh rejected, clearing session: {}", e);
                self.store(None, AuthChangeEvent::signed_out()).await;
                Ok(None)
            }
        }
    }

    fn authorize_url(
        &self,
        request: &OAuthSignIn,
        challenge: &str,
        flow: &str,
    ) -> AuthResult<Url> {
        let mut url = self.endpoint("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", request.provider.as_str());
            if let Some(redirect_to) = request
                .redirect_to
                .as_deref()
                .or(self.redirect_url.as_deref())
            {
                query.append_pair("redirect_to", &with_flow(redirect_to, flow));
            }
            if let Some(scopes) = &request.scopes {
                query.append_pair("scopes", scopes);
            }
            query.append_pair("code_challenge", challenge);
            query.append_pair("code_challenge_method", "s256");
        }
        Ok(url)
    }
}

#[async_trait]
impl AuthCapability for GoTrueCapability {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.is_expired_at(Utc::now()) => self.refresh(&session).await,
            other => Ok(other),
        }
    }

    fn on_auth_state_change(&self, listener: SessionListener) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn sign_in(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        let session = self
            .token_grant(
                "password",
                json!({ "email": credentials.email, "password": credentials.password() }),
            )
            .await?;

        tracing::info!(user_id = %session.user().id, "Signed in with password");
        self.store(
            Some(session.clone()),
            AuthChangeEvent::signed_in(session.clone()),
        )
        .await;
        Ok(AuthSession::from_session(session))
    }

    async fn sign_up(&self, credentials: &Credentials) -> AuthResult<AuthSession> {
        let url = self.endpoint("signup")?;
        let body = json!({
            "email": credentials.email,
            "password": credentials.password(),
            "data": credentials.attributes,
        });
        let response = self.send(self.http_client.post(url).json(&body)).await?;
        let payload: Value = Self::decode(response).await?;

        // Auto-confirmed projects answer with a session, others with the user.
        if payload.get("access_token").is_some() {
            let parsed: SessionResponse = serde_json::from_value(payload).map_err(|e| {
                AuthError::new(format!("Invalid auth server response: {}", e), 502)
            })?;
            let session = parsed.into_session(Utc::now())?;
            tracing::info!(user_id = %session.user().id, "Signed up and signed in");
            self.store(
                Some(session.clone()),
                AuthChangeEvent::signed_in(session.clone()),
            )
            .await;
            return Ok(AuthSession::from_session(session));
        }

        let user_value = payload.get("user").cloned().unwrap_or(payload);
        let parsed: UserResponse = serde_json::from_value(user_value)
            .map_err(|e| AuthError::new(format!("Invalid auth server response: {}", e), 502))?;
        let user = User::try_from(parsed)?;
        tracing::info!(user_id = %user.id, "Signed up, awaiting email confirmation");
        Ok(AuthSession::pending(user))
    }

    async fn sign_in_with_oauth(&self, request: &OAuthSignIn) -> AuthResult<OAuthRedirect> {
        let (verifier, challenge) = pkce_pair();
        let flow = Uuid::new_v4().simple().to_string();
        let url = self.authorize_url(request, &challenge, &flow)?;
        self.begin_flow(flow.clone(), verifier);

        tracing::debug!(provider = %request.provider, %flow, "Starting external sign-in");
        Ok(OAuthRedirect {
            provider: request.provider.clone(),
            url: url.to_string(),
            flow: Some(flow),
        })
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let current = self.session.read().await.clone();
        if let Some(session) = current {
            let url = self.endpoint("logout")?;
            let result = self
                .send(
                    self.http_client
                        .post(url)
                        .bearer_auth(session.access_token()),
                )
                .await;
            match result {
                Ok(_) => {}
                // Already revoked server-side; the local sign-out still applies.
                Err(e) if matches!(e.status, 401 | 403 | 404) => {
                    tracing::debug!("Logout on revoked session: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        self.store(None, AuthChangeEvent::signed_out()).await;
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> AuthResult<()> {
        let mut url = self.endpoint("recover")?;
        if let Some(redirect_url) = &self.redirect_url {
            url.query_pairs_mut().append_pair("redirect_to", redirect_url);
        }
        self.send(
            self.http_client
                .post(url)
                .json(&json!({ "email": email })),
        )
        .await?;
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> AuthResult<()> {
        let session = self.current_session().await?;
        let user = self
            .put_user(&session, json!({ "password": new_password }))
            .await?;

        let updated = session.replacing_user(user);
        self.store(
            Some(updated.clone()),
            AuthChangeEvent::user_updated(updated),
        )
        .await;
        Ok(())
    }

    async fn update_user(&self, attributes: &UserAttributes) -> AuthResult<User> {
        let session = self.current_session().await?;
        let mut body = json!({ "data": attributes.attributes });
        if let Some(email) = &attributes.email {
            body["email"] = json!(email);
        }
        let user = self.put_user(&session, body).await?;

        let updated = session.replacing_user(user.clone());
        self.store(
            Some(updated.clone()),
            AuthChangeEvent::user_updated(updated),
        )
        .await;
        Ok(user)
    }

    async fn exchange_code_for_session(&self, code: &str) -> AuthResult<AuthSession> {
        let verifier = self.take_sole_verifier()?;
        self.exchange_with_verifier(code, verifier).await
    }

    async fn exchange_code_for_flow(
        &self,
        code: &str,
        flow: Option<&str>,
    ) -> AuthResult<AuthSession> {
        let verifier = match flow {
            Some(flow) => self.take_verifier(flow)?,
            None => self.take_sole_verifier()?,
        };
        self.exchange_with_verifier(code, verifier).await
    }
}

impl std::fmt::Debug for GoTrueCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoTrueCapability")
            .field("base", &self.base.as_str())
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}
