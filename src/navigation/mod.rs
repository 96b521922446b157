//! History primitive and back-navigation guard.
//!
//! The host environment (browser shell, webview, test harness) implements
//! [`Navigator`]. [`MemoryHistory`] is a self-contained implementation used
//! by headless hosts and tests.

pub mod guard;
pub mod history;

pub use guard::{rewrite_to_login, NavigationGuard};
pub use history::MemoryHistory;

use std::sync::Weak;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Back,
    Forward,
}

/// A back/forward traversal the user is attempting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEvent {
    pub direction: TraversalDirection,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDecision {
    /// Let the traversal happen.
    Allow,
    /// Suppress the traversal; the handler has already rewritten history.
    Cancel,
}

pub trait TraversalHandler: Send + Sync {
    fn on_traversal(&self, event: &TraversalEvent) -> TraversalDecision;
}

/// The host's navigation primitive.
pub trait Navigator: Send + Sync {
    /// Location currently shown.
    fn current_path(&self) -> String;
    /// Overwrite the current history entry (not traversable).
    fn replace(&self, path: &str);
    /// Append a history entry and make it current.
    fn push(&self, path: &str);
    /// Router-level navigation: render `path` in place of the current view.
    fn navigate(&self, path: &str);
    /// Register a traversal handler. Handlers are held weakly; whoever
    /// registers one keeps it alive for as long as it should run.
    fn add_traversal_handler(&self, handler: Weak<dyn TraversalHandler>);
}
