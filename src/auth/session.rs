//! Session state machine.
//!
//! ```text
//!   Unknown ──check_auth ok──▶ Authenticated
//!      │                          │
//!      └──check_auth fail──┐      ├──check_auth fail──┐
//!                          ▼      ▼                   │
//!                   Unauthenticated ◀──── logout ─────┘ (from any state)
//! ```
//!
//! `check_auth` may run any number of times (every protected-view mount,
//! every cross-tab hint, every poll tick). It never fails: every reason a
//! session is unusable resolves to `Unauthenticated` plus a clear of whatever
//! stale keys are still in the shared store.

use super::store::{Observation, SessionStore, UserRecord};
use super::token::{self, Claims};
use crate::clock::Clock;
use crate::error::SessionError;
use crate::navigation::{rewrite_to_login, Navigator};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Bound on re-reads when another context keeps writing mid-check.
const MAX_CHECK_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// In-memory view of the session for one execution context.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: SessionStatus,
    pub token: Option<String>,
    pub claims: Option<Claims>,
    pub user: Option<UserRecord>,
}

impl Session {
    fn unknown() -> Self {
        Self {
            status: SessionStatus::Unknown,
            token: None,
            claims: None,
            user: None,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            ..Self::unknown()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

pub struct SessionMachine {
    store: SessionStore,
    clock: Arc<dyn Clock>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    session: RwLock<Session>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionMachine {
    pub fn new(
        store: SessionStore,
        clock: Arc<dyn Clock>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(SessionStatus::Unknown);
        Self {
            store,
            clock,
            navigator,
            login_path: login_path.into(),
            session: RwLock::new(Session::unknown()),
            status_tx,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn status(&self) -> SessionStatus {
        self.session.read().status
    }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.session.read().user.clone()
    }

    /// Status change notifications. A value is published only on change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Re-derive the session from the shared store. Returns whether the
    /// session is authenticated afterwards.
    ///
    /// A verdict is only committed while the store still holds what it was
    /// derived from; a logout or another tab's write landing mid-check makes
    /// the check start over instead of publishing a stale status.
    pub fn check_auth(&self) -> bool {
        for _ in 0..MAX_CHECK_ATTEMPTS {
            let observation = self.store.observe();
            match self.validate(&observation) {
                Ok(session) => {
                    if self.commit(&observation, session) {
                        return true;
                    }
                }
                Err(reason) if observation.is_empty() => {
                    if self.commit(&observation, Session::unauthenticated()) {
                        tracing::debug!(context = %self.store.context(), "No stored session: {reason}");
                        return false;
                    }
                }
                Err(reason) => {
                    if self.store.clear_if_unchanged(&observation).is_some() {
                        tracing::info!(
                            context = %self.store.context(),
                            "Stored session rejected, cleared: {reason}"
                        );
                        let cleared = self.store.observe();
                        if cleared.is_empty() && self.commit(&cleared, Session::unauthenticated()) {
                            return false;
                        }
                    }
                }
            }
            tracing::debug!(
                context = %self.store.context(),
                "Store changed during check, re-reading"
            );
        }

        // Another context kept rewriting the store. Fail closed without
        // clearing it out from under that writer; its change notification
        // triggers another check.
        tracing::warn!(
            context = %self.store.context(),
            "Store kept changing during check, treating session as unauthenticated"
        );
        self.transition(Session::unauthenticated());
        false
    }

    /// Publish `session` if the store still matches `observation`.
    fn commit(&self, observation: &Observation, session: Session) -> bool {
        self.store
            .commit_if_unchanged(observation, || self.transition(session))
            .is_some()
    }

    fn validate(&self, observation: &Observation) -> Result<Session, SessionError> {
        let stored = self.store.parse(observation)?;
        let token = stored.token.ok_or(SessionError::NoToken)?;
        let claims = token::decode(&token)?;
        if token::is_expired(&claims, self.clock.now_millis()) {
            return Err(SessionError::Expired {
                expires_at: claims.expires_at_epoch_seconds,
            });
        }
        let user = stored
            .user
            .ok_or_else(|| SessionError::MalformedUserRecord("no user record stored".into()))?;

        Ok(Session {
            status: SessionStatus::Authenticated,
            token: Some(token),
            claims: Some(claims),
            user: Some(user),
        })
    }

    /// Persist a freshly issued session and evaluate it.
    pub fn login(&self, token: &str, user: &UserRecord) -> bool {
        self.store.write_session(token, user);
        let authenticated = self.check_auth();
        if authenticated {
            tracing::info!(context = %self.store.context(), "Session established");
        }
        authenticated
    }

    /// End the session: clear every alias, neutralise history, go to login.
    ///
    /// After this returns the store holds no alias keys and the status is
    /// `Unauthenticated`, whatever the state was before.
    pub fn logout(&self) {
        let cleared = self.store.clear();
        self.transition(Session::unauthenticated());
        rewrite_to_login(self.navigator.as_ref(), &self.login_path);
        self.navigator.navigate(&self.login_path);
        tracing::info!(context = %self.store.context(), cleared, "Logged out");
    }

    fn transition(&self, next: Session) {
        let status = next.status;
        // The watch is updated under the session lock so `status()` and
        // subscribers never disagree.
        let mut session = self.session.write();
        let previous = session.status;
        *session = next;
        if previous != status {
            tracing::debug!(
                context = %self.store.context(),
                from = ?previous,
                to = ?status,
                "Session status changed"
            );
        }
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
