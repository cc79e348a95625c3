//! HTTP handlers for external sign-in.
//!
//! The sign-in route starts a flow with the identity backend and sends the
//! browser to the provider. The callback trades the one-time authorization
//! code for a session within that flow and answers with `302 Found`.
//! Failures redirect to the sign-in page with a short message; exchange
//! details are logged, never put in the URL.

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use url::Url;

use crate::application::auth::Capability;
use crate::config::CALLBACK_PATH;
use crate::domain::auth::{ExternalProvider, OAuthSignIn};

use super::dto::{CallbackQuery, HealthResponse, SignInQuery};

/// Message used when the upstream error carries no text.
pub const GENERIC_UPSTREAM_ERROR: &str = "External sign-in failed";

/// Message used when the code exchange fails.
pub const EXCHANGE_FAILED_MESSAGE: &str = "Authentication failed. Please try again.";

/// Message used when an external sign-in cannot be started.
pub const START_FAILED_MESSAGE: &str = "Could not start external sign-in. Please try again.";

const DEFAULT_REDIRECT: &str = "/";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state of the callback routes.
#[derive(Clone, Debug)]
pub struct CallbackState {
    pub capability: Capability,
    /// Path failed callbacks redirect to
    pub sign_in_path: String,
    /// Public origin of the deployment. Its scheme applies to `Host`-derived
    /// origins, and it is the origin used when the request has no `Host`.
    pub public_origin: Option<String>,
}

impl CallbackState {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            sign_in_path: "/signin".to_string(),
            public_origin: None,
        }
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn with_public_origin(mut self, origin: impl Into<String>) -> Self {
        self.public_origin = Some(origin.into());
        self
    }

    fn public_origin(&self) -> Option<Url> {
        self.public_origin
            .as_deref()
            .and_then(|origin| Url::parse(origin).ok())
    }

    /// Origin of the current request: `Host` header, then the public
    /// origin, then localhost. The scheme is the public origin's when one is
    /// configured, `http` otherwise.
    fn request_origin(&self, headers: &HeaderMap) -> Option<Url> {
        let public = self.public_origin();
        let scheme = public.as_ref().map_or("http", Url::scheme);
        headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .and_then(|host| Url::parse(&format!("{}://{}/", scheme, host)).ok())
            .or_else(|| public.clone())
            .or_else(|| Url::parse("http://localhost/").ok())
    }

    /// Absolute callback URL handed to the backend when a flow starts,
    /// carrying the sanitized post-login destination.
    fn callback_url(&self, headers: &HeaderMap, redirect: Option<&str>) -> Option<Url> {
        let origin = self.public_origin().or_else(|| self.request_origin(headers))?;
        let mut callback = origin.join(CALLBACK_PATH).ok()?;
        if let Some(redirect) = redirect {
            let target = resolve_redirect(&origin, redirect);
            callback.query_pairs_mut().append_pair("redirect", &target);
        }
        Some(callback)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Redirect Helpers
// ════════════════════════════════════════════════════════════════════════════════

/// Failure text for an upstream error: description, then code, then generic.
pub fn failure_message<'a>(error: Option<&'a str>, description: Option<&'a str>) -> &'a str {
    description.or(error).unwrap_or(GENERIC_UPSTREAM_ERROR)
}

/// Sign-in location carrying `message` as the `error` parameter.
pub fn sign_in_location(sign_in_path: &str, message: &str) -> String {
    format!("{}?error={}", sign_in_path, urlencoding::encode(message))
}

/// Resolve `redirect` against `origin` and return a path-only location.
///
/// Anything that leaves the origin falls back to `/`.
pub fn resolve_redirect(origin: &Url, redirect: &str) -> String {
    let Ok(resolved) = origin.join(redirect) else {
        return DEFAULT_REDIRECT.to_string();
    };
    if resolved.origin() != origin.origin() {
        tracing::warn!(redirect, "Rejected cross-origin callback redirect");
        return DEFAULT_REDIRECT.to_string();
    }

    let path = resolved.path();
    // A leading "//" would be read as protocol-relative by the browser.
    if !path.starts_with('/') || path.starts_with("//") {
        return DEFAULT_REDIRECT.to_string();
    }
    match resolved.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}

fn found(location: &str) -> Response {
    let value = HeaderValue::from_str(location)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_REDIRECT));
    (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// GET/POST /api/auth/callback - Complete an external sign-in
pub async fn handle_callback(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = CallbackQuery::parse(raw.as_deref());

    if query.error.is_some() {
        let message = failure_message(query.error.as_deref(), query.error_description.as_deref());
        tracing::info!(
            error = ?query.error,
            description = ?query.error_description,
            "External sign-in reported an error"
        );
        return found(&sign_in_location(&state.sign_in_path, message));
    }

    if let Some(code) = query.code.as_deref() {
        match state
            .capability
            .exchange_code_for_flow(code, query.flow.as_deref())
            .await
        {
            Ok(result) => {
                tracing::info!(
                    user_id = ?result.user.as_ref().map(|u| u.id.as_str()),
                    "Completed external sign-in"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authorization code exchange failed");
                return found(&sign_in_location(
                    &state.sign_in_path,
                    EXCHANGE_FAILED_MESSAGE,
                ));
            }
        }
    }

    let redirect = query.redirect.as_deref().unwrap_or(DEFAULT_REDIRECT);
    match state.request_origin(&headers) {
        Some(origin) => found(&resolve_redirect(&origin, redirect)),
        None => found(DEFAULT_REDIRECT),
    }
}

/// GET /api/auth/signin/{provider} - Start an external sign-in
///
/// Redirects the browser to the provider's authorization page. The backend
/// keeps the flow's PKCE verifier until the callback comes back.
pub async fn start_sign_in(
    State(state): State<CallbackState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = SignInQuery::parse(raw.as_deref());
    let failed = || found(&sign_in_location(&state.sign_in_path, START_FAILED_MESSAGE));

    let Some(provider) = ExternalProvider::from_name(&name) else {
        tracing::info!(provider = %name, "Rejected sign-in with an invalid provider name");
        return failed();
    };
    let Some(callback) = state.callback_url(&headers, query.redirect.as_deref()) else {
        tracing::error!("Could not build the callback URL");
        return failed();
    };

    let mut request = OAuthSignIn::new(provider).with_redirect_to(callback.as_str());
    if let Some(scopes) = query.scopes {
        request = request.with_scopes(scopes);
    }

    match state.capability.sign_in_with_oauth(&request).await {
        Ok(redirect) => {
            tracing::info!(
                provider = %redirect.provider,
                flow = ?redirect.flow,
                "Started external sign-in"
            );
            found(&redirect.url)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not start external sign-in");
            failed()
        }
    }
}

/// GET /health - Liveness and auth configuration
pub async fn health(State(state): State<CallbackState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        auth: if state.capability.is_configured() {
            "configured"
        } else {
            "disabled"
        },
    })
}
