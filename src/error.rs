//! Error kinds for the session core.
//!
//! `NoToken`, `Decode`, `Expired`, `MalformedUserRecord` and
//! `AliasInconsistency` are absorbed by `SessionMachine::check_auth`, which
//! resolves them to an unauthenticated session. `AuthorizationFailure` is what
//! the HTTP wrapper hands back to callers after the response policy ran.

use crate::gateway::PolicyOutcome;

/// Failure to extract claims from a bearer token.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token has {found} segment(s), expected at least 2")]
    SegmentCount { found: usize },
    #[error("payload segment is not valid base64url: {0}")]
    Base64(String),
    #[error("payload segment is not a JSON object: {0}")]
    Payload(String),
    #[error("payload has no numeric `exp` claim")]
    MissingExpiry,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no token in session store")]
    NoToken,
    #[error("token could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("token expired at {expires_at} (epoch seconds)")]
    Expired { expires_at: i64 },
    #[error("stored user record is malformed: {0}")]
    MalformedUserRecord(String),
    #[error("alias keys for `{field}` disagree")]
    AliasInconsistency { field: &'static str },
    #[error("authorization failure ({status}): {message}")]
    AuthorizationFailure {
        status: u16,
        message: String,
        outcome: PolicyOutcome,
    },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SessionError {
    /// Whether this error came back from the network as a 401/403.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self, Self::AuthorizationFailure { .. })
    }
}
