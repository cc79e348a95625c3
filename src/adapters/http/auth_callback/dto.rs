//! HTTP DTOs for the callback and health endpoints.

use serde::Serialize;

/// Query parameters of the external sign-in callback.
///
/// Empty values are treated as absent. When a key repeats, the first value
/// is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackQuery {
    /// One-time authorization grant
    pub code: Option<String>,
    /// Post-login destination path
    pub redirect: Option<String>,
    /// Handle of the flow started by the sign-in route
    pub flow: Option<String>,
    /// Upstream error code
    pub error: Option<String>,
    /// Upstream human-readable error
    pub error_description: Option<String>,
}

impl CallbackQuery {
    /// Parse a raw `application/x-www-form-urlencoded` query string.
    ///
    /// Never fails; undecodable or unknown pairs are ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        for_each_pair(raw, |key, value| {
            let slot = match key {
                "code" => &mut query.code,
                "redirect" => &mut query.redirect,
                "flow" => &mut query.flow,
                "error" => &mut query.error,
                "error_description" => &mut query.error_description,
                _ => return,
            };
            keep_first(slot, value);
        });
        query
    }
}

/// Query parameters of `GET /api/auth/signin/{provider}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInQuery {
    /// Post-login destination path, handed to the callback
    pub redirect: Option<String>,
    /// Space-separated scopes requested from the provider
    pub scopes: Option<String>,
}

impl SignInQuery {
    /// Same rules as [`CallbackQuery::parse`].
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        for_each_pair(raw, |key, value| {
            let slot = match key {
                "redirect" => &mut query.redirect,
                "scopes" => &mut query.scopes,
                _ => return,
            };
            keep_first(slot, value);
        });
        query
    }
}

fn for_each_pair(raw: Option<&str>, mut visit: impl FnMut(&str, &str)) {
    let Some(raw) = raw else {
        return;
    };
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let value = value.trim();
        if !value.is_empty() {
            visit(key.as_ref(), value);
        }
    }
}

fn keep_first(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
    /// "configured" or "disabled"
    pub auth: &'static str,
}
