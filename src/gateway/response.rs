//! Inbound authorization-failure policy.
//!
//! Only 401/403 responses activate the policy. Decision order:
//!
//! 1. Classify the failure as expiry-like (structured `code` first, message
//!    vocabulary only when no code is present).
//! 2. Exempt endpoints (profile retrieval and the like) never touch the
//!    session; a transient profile-fetch failure must not cause logout loops.
//! 3. Expiry-like on a protected route: full logout and redirect to login.
//! 4. Expiry-like on a public route: clear the stale credential silently.
//! 5. Anything else is a permissions problem: warn and pass through.
//!
//! Only steps 3 and 4 mutate the session store.

use crate::auth::SessionMachine;
use crate::config::AuthConfig;
use crate::navigation::Navigator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    /// Not an authorization failure.
    Passthrough,
    /// Failure on an exempt endpoint; session untouched.
    Exempt,
    /// Expiry-like failure on a protected route; session ended.
    ForcedLogout,
    /// Expiry-like failure on a public route; store cleared, no redirect.
    SilentClear,
    /// Authorization failure unrelated to credential validity.
    PermissionDenied,
}

impl PolicyOutcome {
    pub fn mutated_session(self) -> bool {
        matches!(self, Self::ForcedLogout | Self::SilentClear)
    }

    /// Whether the caller should stop rendering the current view.
    pub fn redirected(self) -> bool {
        self == Self::ForcedLogout
    }
}

/// A failed response as seen by the policy.
#[derive(Debug, Clone, Copy)]
pub struct AuthFailure<'a> {
    pub status: u16,
    /// Path of the request that failed (`/api/users/profile`).
    pub request_path: &'a str,
    /// Raw response body.
    pub body: &'a str,
}

/// Fields of interest in an error body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorDetails {
    /// JSON bodies yield `code` and `message` (falling back to `error`);
    /// anything else is taken as the message text.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self {
                code: parsed.code.filter(|c| !c.trim().is_empty()),
                message: parsed.message.or(parsed.error).unwrap_or_default(),
            },
            Err(_) => Self {
                code: None,
                message: body.trim().to_string(),
            },
        }
    }
}

/// Decides whether a failure means "your credential is dead".
#[derive(Debug, Clone)]
pub struct ExpiryClassifier {
    vocabulary: Vec<String>,
    codes: Vec<String>,
}

impl ExpiryClassifier {
    pub fn new(vocabulary: &[String], codes: &[String]) -> Self {
        Self {
            vocabulary: vocabulary
                .iter()
                .map(|v| v.to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
            codes: codes.to_vec(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.expiry_vocabulary, &config.expiry_codes)
    }

    pub fn is_expiry_like(&self, details: &ErrorDetails) -> bool {
        if let Some(code) = &details.code {
            return self.codes.iter().any(|c| c.eq_ignore_ascii_case(code));
        }
        let message = details.message.to_lowercase();
        self.vocabulary.iter().any(|v| message.contains(v.as_str()))
    }
}

pub struct ResponseAuthPolicy {
    machine: Arc<SessionMachine>,
    navigator: Arc<dyn Navigator>,
    config: Arc<AuthConfig>,
    classifier: ExpiryClassifier,
}

impl ResponseAuthPolicy {
    pub fn new(
        machine: Arc<SessionMachine>,
        navigator: Arc<dyn Navigator>,
        config: Arc<AuthConfig>,
    ) -> Self {
        let classifier = ExpiryClassifier::from_config(&config);
        Self {
            machine,
            navigator,
            config,
            classifier,
        }
    }

    pub fn evaluate(&self, failure: &AuthFailure<'_>) -> PolicyOutcome {
        if failure.status != 401 && failure.status != 403 {
            return PolicyOutcome::Passthrough;
        }

        let details = ErrorDetails::parse(failure.body);
        let expiry_like = self.classifier.is_expiry_like(&details);

        if self.config.is_exempt_endpoint(failure.request_path) {
            tracing::debug!(
                status = failure.status,
                path = failure.request_path,
                expiry_like,
                "Authorization failure on exempt endpoint, session untouched"
            );
            return PolicyOutcome::Exempt;
        }

        let location = self.navigator.current_path();
        if expiry_like && self.config.is_protected(&location) {
            tracing::info!(
                status = failure.status,
                path = failure.request_path,
                location = %location,
                message = %details.message,
                "Credential rejected on protected route, logging out"
            );
            self.machine.logout();
            return PolicyOutcome::ForcedLogout;
        }

        if expiry_like {
            tracing::info!(
                status = failure.status,
                path = failure.request_path,
                location = %location,
                "Credential rejected on public route, clearing it"
            );
            self.machine.store().clear();
            self.machine.check_auth();
            return PolicyOutcome::SilentClear;
        }

        tracing::warn!(
            status = failure.status,
            path = failure.request_path,
            code = ?details.code,
            message = %details.message,
            "Authorization failure not related to credential validity"
        );
        PolicyOutcome::PermissionDenied
    }
}
