//! Provider factory - builds the shared capability from configuration.
//!
//! Construction never fails. Any problem is logged and the unconfigured
//! sentinel is returned so the rest of the process keeps running with auth
//! disabled.

use std::sync::Arc;

use thiserror::Error;

use super::Capability;
use crate::adapters::auth::{GoTrueCapability, GoTrueConfig, GoTrueSetupError};
use crate::config::AuthConfig;
use crate::ports::AuthCapability;

/// Reasons the default backend could not be built.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Auth backend not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Setup(#[from] GoTrueSetupError),
}

/// Build the GoTrue capability, or `Unconfigured` on any failure.
///
/// `redirect_base` is used as the external sign-in redirect when the config
/// has no explicit `redirect_url`.
pub fn create_default_capability(config: &AuthConfig, redirect_base: Option<&str>) -> Capability {
    match build_gotrue(config, redirect_base) {
        Ok(backend) => {
            tracing::info!(url = ?config.url(), "Auth backend configured");
            Capability::configured(backend)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Auth disabled");
            Capability::Unconfigured
        }
    }
}

/// Use `custom` when supplied, otherwise the default factory.
pub fn resolve_capability(
    custom: Option<Arc<dyn AuthCapability>>,
    config: &AuthConfig,
    redirect_base: Option<&str>,
) -> Capability {
    match custom {
        Some(backend) => {
            tracing::debug!("Using injected auth backend");
            Capability::Configured(backend)
        }
        None => create_default_capability(config, redirect_base),
    }
}

fn build_gotrue(
    config: &AuthConfig,
    redirect_base: Option<&str>,
) -> Result<GoTrueCapability, ProviderError> {
    let url = config
        .url()
        .ok_or(ProviderError::NotConfigured("AUTH__SUPABASE_URL"))?;
    let anon_key = config
        .anon_key()
        .ok_or(ProviderError::NotConfigured("AUTH__SUPABASE_ANON_KEY"))?;

    let mut gotrue = GoTrueConfig {
        url: url.to_string(),
        anon_key: anon_key.clone(),
        redirect_url: None,
        timeout: config.request_timeout(),
    };
    let redirect = config
        .redirect_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .or(redirect_base);
    if let Some(redirect) = redirect {
        gotrue = gotrue.with_redirect_url(redirect);
    }

    Ok(GoTrueCapability::new(gotrue)?)
}
