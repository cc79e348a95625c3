//! Auth application layer.
//!
//! - `Capability` - configured backend or the unconfigured sentinel
//! - `provider_factory` - builds the capability from configuration
//! - `SessionController` - reactive session state
//! - `AuthProvider` / `AuthContext` - the consumer-facing binding

mod capability;
mod context;
mod provider_factory;
mod session_controller;

pub use capability::Capability;
pub use context::{use_auth_context, AuthContext, AuthProvider};
pub use provider_factory::{create_default_capability, resolve_capability, ProviderError};
pub use session_controller::{SessionController, SessionPhase, SessionState};
