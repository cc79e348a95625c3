//! Identity backend adapters.
//!
//! Implementations of the `AuthCapability` port:
//!
//! - `gotrue` - GoTrue (Supabase Auth) REST implementation
//! - `in_memory` - Process-local implementation for tests and local development
//! - `notifier` - Change fan-out shared by every implementation

mod gotrue;
mod in_memory;
mod notifier;

#[cfg(test)]
pub(crate) use gotrue::test_server as gotrue_test_server;
pub use gotrue::{GoTrueCapability, GoTrueConfig, GoTrueSetupError, FLOW_PARAM};
pub use in_memory::InMemoryAuthBackend;
pub use notifier::ChangeNotifier;
