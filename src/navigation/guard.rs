//! Back/forward navigation guard.
//!
//! Once the session is not authenticated, any history traversal is
//! cancelled and the address forced to the login view, with an extra login
//! entry pushed so repeated back-presses keep landing on login instead of
//! unwinding into protected views.
//!
//! This is a UX deterrent, not access control. A client can always bypass
//! client-side navigation; every protected request is authorised by the
//! server on its own.

use super::{Navigator, TraversalDecision, TraversalEvent, TraversalHandler};
use crate::auth::{SessionMachine, SessionStatus};
use std::sync::Arc;

/// Force the current entry to `login_path` (not traversable), then push
/// another `login_path` entry on top.
pub fn rewrite_to_login(navigator: &dyn Navigator, login_path: &str) {
    navigator.replace(login_path);
    navigator.push(login_path);
}

pub struct NavigationGuard {
    machine: Arc<SessionMachine>,
    navigator: Arc<dyn Navigator>,
}

impl NavigationGuard {
    /// Build the guard and register it with the navigator. The returned
    /// `Arc` must be kept alive for as long as the guard should run.
    pub fn install(machine: Arc<SessionMachine>, navigator: Arc<dyn Navigator>) -> Arc<Self> {
        let guard = Arc::new(Self {
            machine,
            navigator: Arc::clone(&navigator),
        });
        let handler: Arc<dyn TraversalHandler> = guard.clone();
        navigator.add_traversal_handler(Arc::downgrade(&handler));
        guard
    }
}

impl TraversalHandler for NavigationGuard {
    fn on_traversal(&self, event: &TraversalEvent) -> TraversalDecision {
        if self.machine.status() == SessionStatus::Authenticated {
            return TraversalDecision::Allow;
        }
        tracing::debug!(
            from = %event.from,
            to = %event.to,
            direction = ?event.direction,
            "Traversal blocked, session not authenticated"
        );
        rewrite_to_login(self.navigator.as_ref(), self.machine.login_path());
        TraversalDecision::Cancel
    }
}
