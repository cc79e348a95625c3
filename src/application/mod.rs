//! Application layer - orchestration between ports and consumers.
//!
//! `auth` holds the capability handle, the provider factory, the session
//! controller and the context binding.

pub mod auth;

pub use auth::{
    create_default_capability, resolve_capability, use_auth_context, AuthContext, AuthProvider,
    Capability, ProviderError, SessionController, SessionPhase, SessionState,
};
