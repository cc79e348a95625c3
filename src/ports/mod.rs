//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `AuthCapability` - Operation set of an identity backend
//! - `Subscription` - Cancellation handle for session-change listeners

mod auth_capability;

pub use auth_capability::{AuthCapability, SessionListener, Subscription};
