//! Identity Gate - pluggable identity and session layer.
//!
//! Decouples application code from a concrete identity backend through the
//! `AuthCapability` port, keeps a reactive session state in sync with
//! backend-reported transitions, and serves the external sign-in callback.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
