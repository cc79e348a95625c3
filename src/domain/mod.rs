//! Domain layer containing the identity types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, validation errors)
//! - `auth` - Sessions, users, change events and the auth error model

pub mod auth;
pub mod foundation;
