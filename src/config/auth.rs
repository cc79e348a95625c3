//! Authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use super::server::Environment;

/// Identity backend configuration (GoTrue / Supabase Auth)
///
/// Every field is optional. A partial or empty section still loads; the
/// provider factory then degrades to the unconfigured capability.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Project URL, e.g. "https://xyz.supabase.co"
    pub supabase_url: Option<String>,

    /// Public anon key
    pub supabase_anon_key: Option<SecretString>,

    /// Absolute URL the backend redirects to after external sign-in
    pub redirect_url: Option<String>,

    /// Path that failed callbacks redirect to
    #[serde(default = "default_sign_in_path")]
    pub sign_in_path: String,

    /// Timeout for backend requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl AuthConfig {
    /// Trimmed, non-empty backend URL
    pub fn url(&self) -> Option<&str> {
        self.supabase_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Non-empty anon key
    pub fn anon_key(&self) -> Option<&SecretString> {
        self.supabase_anon_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
    }

    /// True when both the URL and the anon key are present
    pub fn is_configured(&self) -> bool {
        self.url().is_some() && self.anon_key().is_some()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate authentication configuration
    ///
    /// Missing values are allowed; values that are present must be well
    /// formed. In production the backend URL must use HTTPS.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        if !self.sign_in_path.starts_with('/') || self.sign_in_path.starts_with("//") {
            return Err(ValidationError::InvalidSignInPath);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout);
        }

        if let Some(url) = self.url() {
            let parsed =
                url::Url::parse(url).map_err(|_| ValidationError::InvalidUrl("AUTH__SUPABASE_URL"))?;
            if *environment == Environment::Production && parsed.scheme() != "https" {
                return Err(ValidationError::UrlMustBeHttps("AUTH__SUPABASE_URL"));
            }
        }

        if let Some(redirect_url) = self.redirect_url.as_deref().filter(|u| !u.is_empty()) {
            url::Url::parse(redirect_url)
                .map_err(|_| ValidationError::InvalidUrl("AUTH__REDIRECT_URL"))?;
        }

        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            redirect_url: None,
            sign_in_path: default_sign_in_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_sign_in_path() -> String {
    "/signin".to_string()
}

fn default_request_timeout() -> u64 {
    10
}
