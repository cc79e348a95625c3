//! HTTP adapters - Axum routes.

pub mod auth_callback;

pub use auth_callback::{auth_router, CallbackState};
