//! Axum router configuration for the callback and health endpoints.

use axum::{routing::get, Router};

use super::handlers::{handle_callback, health, start_sign_in, CallbackState};

/// Create the auth router, mounted under `/api/auth`.
///
/// # Routes
/// - `GET /signin/:provider` - Start an external sign-in
/// - `GET /callback` - Complete an external sign-in
/// - `POST /callback` - Same as GET; the query string carries the parameters
pub fn auth_callback_routes() -> Router<CallbackState> {
    Router::new()
        .route("/signin/:provider", get(start_sign_in))
        .route("/callback", get(handle_callback).post(handle_callback))
}

/// Create the health router.
///
/// # Routes
/// - `GET /health` - Liveness and auth configuration
pub fn health_routes() -> Router<CallbackState> {
    Router::new().route("/health", get(health))
}

/// Create the complete router with state applied.
pub fn auth_router(state: CallbackState) -> Router {
    Router::new()
        .nest("/api/auth", auth_callback_routes())
        .merge(health_routes())
        .with_state(state)
}
