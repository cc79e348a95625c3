//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `auth` - Identity backends (GoTrue, in-memory) and the change notifier
//! - `http` - Axum routes for the external sign-in callback and health

pub mod auth;
pub mod http;
