//! Session core configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file
//! at all) yields a working configuration for the records portal.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Route the user lands on after logout or a forced redirect.
    pub login_path: String,
    /// Token alias group, read priority order (primary first).
    pub token_keys: Vec<String>,
    /// User-record alias group, read priority order (primary first).
    pub user_keys: Vec<String>,
    /// Auxiliary role-hint key.
    pub role_key: String,
    /// UI locations that require an authenticated session.
    pub protected_prefixes: Vec<String>,
    /// Request-path fragments whose 401/403 never touch the session.
    pub exempt_endpoints: Vec<String>,
    /// Lower-case substrings that mark an error message as expiry-like.
    pub expiry_vocabulary: Vec<String>,
    /// Structured server error codes that mark a failure as expiry-like.
    pub expiry_codes: Vec<String>,
    /// Proactive expiry re-check period. `None` or 0 disables polling.
    pub poll_interval_secs: Option<u64>,
    /// JSON snapshot backing the shared store. `None` keeps it in memory.
    pub storage_path: Option<PathBuf>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".into(),
            token_keys: strings(&["token", "authToken"]),
            user_keys: strings(&["user", "userData"]),
            role_key: "userRole".into(),
            protected_prefixes: strings(&[
                "/dashboard",
                "/residents",
                "/officials",
                "/complaints",
                "/blotter",
                "/users",
                "/settings",
                "/reports",
            ]),
            exempt_endpoints: strings(&["/profile", "/auth/me"]),
            expiry_vocabulary: strings(&[
                "invalid token",
                "token expired",
                "jwt expired",
                "jwt malformed",
                "invalid signature",
                "token is not valid",
                "expired",
                "malformed",
            ]),
            expiry_codes: strings(&[
                "TOKEN_EXPIRED",
                "TOKEN_INVALID",
                "TOKEN_MALFORMED",
                "TOKEN_MISSING",
            ]),
            poll_interval_secs: None,
            storage_path: None,
        }
    }
}

impl AuthConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(login) = std::env::var("PORTAL_LOGIN_PATH") {
            if !login.trim().is_empty() {
                self.login_path = login.trim().to_string();
            }
        }
        if let Ok(secs) = std::env::var("PORTAL_SESSION_POLL_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) => self.poll_interval_secs = Some(secs),
                Err(e) => tracing::warn!(value = %secs, "Ignoring PORTAL_SESSION_POLL_SECS: {e}"),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_keys.is_empty() {
            bail!("token_keys must name at least one storage key");
        }
        if self.user_keys.is_empty() {
            bail!("user_keys must name at least one storage key");
        }
        if self.role_key.trim().is_empty() {
            bail!("role_key cannot be empty");
        }
        if !self.login_path.starts_with('/') {
            bail!("login_path must be an absolute route, got '{}'", self.login_path);
        }
        if self.is_protected(&self.login_path) {
            bail!(
                "login_path '{}' is itself a protected route; logout would loop",
                self.login_path
            );
        }
        Ok(())
    }

    /// Whether a UI location requires an authenticated session.
    pub fn is_protected(&self, location: &str) -> bool {
        let path = strip_query(location);
        self.protected_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            !prefix.is_empty()
                && (path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/')))
        })
    }

    /// Whether a failing request targeted an endpoint exempt from session action.
    pub fn is_exempt_endpoint(&self, request_path: &str) -> bool {
        let path = strip_query(request_path);
        self.exempt_endpoints
            .iter()
            .any(|fragment| !fragment.is_empty() && path.contains(fragment.as_str()))
    }

    /// Effective polling period, if polling is enabled.
    pub fn poll_interval(&self) -> Option<std::time::Duration> {
        self.poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
    }
}

fn strip_query(location: &str) -> &str {
    location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
}
