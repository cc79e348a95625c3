//! HTTP adapter for external sign-in.
//!
//! - `GET /api/auth/signin/:provider` - Start a sign-in and redirect to the provider
//! - `GET /api/auth/callback` - Exchange an authorization code and redirect
//! - `POST /api/auth/callback` - Same as GET
//! - `GET /health` - Liveness and auth configuration

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::{CallbackQuery, HealthResponse, SignInQuery};
pub use handlers::{
    failure_message, resolve_redirect, sign_in_location, CallbackState,
    EXCHANGE_FAILED_MESSAGE, GENERIC_UPSTREAM_ERROR, START_FAILED_MESSAGE,
};
pub use routes::{auth_callback_routes, auth_router, health_routes};
