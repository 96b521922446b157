//! In-memory history stack.

use super::{Navigator, TraversalDecision, TraversalDirection, TraversalEvent, TraversalHandler};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct HistoryState {
    entries: Vec<String>,
    index: usize,
}

/// A browser-like history stack with back/forward traversal.
pub struct MemoryHistory {
    state: Mutex<HistoryState>,
    handlers: Mutex<Vec<Weak<dyn TraversalHandler>>>,
}

impl MemoryHistory {
    pub fn new(initial: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HistoryState {
                entries: vec![initial.to_string()],
                index: 0,
            }),
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// Go back one entry. No-op (`Allow`) at the start of history.
    pub fn back(&self) -> TraversalDecision {
        self.traverse(TraversalDirection::Back)
    }

    /// Go forward one entry. No-op (`Allow`) at the end of history.
    pub fn forward(&self) -> TraversalDecision {
        self.traverse(TraversalDirection::Forward)
    }

    pub fn entries(&self) -> Vec<String> {
        self.state.lock().entries.clone()
    }

    pub fn index(&self) -> usize {
        self.state.lock().index
    }

    fn traverse(&self, direction: TraversalDirection) -> TraversalDecision {
        let event = {
            let state = self.state.lock();
            let target = match direction {
                TraversalDirection::Back => state.index.checked_sub(1),
                TraversalDirection::Forward => {
                    Some(state.index + 1).filter(|i| *i < state.entries.len())
                }
            };
            let Some(target) = target else {
                return TraversalDecision::Allow;
            };
            TraversalEvent {
                direction,
                from: state.entries[state.index].clone(),
                to: state.entries[target].clone(),
            }
        };

        // Handlers may rewrite history, so no lock is held while they run.
        let handlers: Vec<Arc<dyn TraversalHandler>> = {
            let mut handlers = self.handlers.lock();
            handlers.retain(|h| h.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };
        for handler in handlers {
            if handler.on_traversal(&event) == TraversalDecision::Cancel {
                return TraversalDecision::Cancel;
            }
        }

        let mut state = self.state.lock();
        match direction {
            TraversalDirection::Back => state.index = state.index.saturating_sub(1),
            TraversalDirection::Forward => {
                if state.index + 1 < state.entries.len() {
                    state.index += 1;
                }
            }
        }
        TraversalDecision::Allow
    }
}

impl Navigator for MemoryHistory {
    fn current_path(&self) -> String {
        let state = self.state.lock();
        state.entries[state.index].clone()
    }

    fn replace(&self, path: &str) {
        let mut state = self.state.lock();
        let index = state.index;
        state.entries[index] = path.to_string();
    }

    fn push(&self, path: &str) {
        let mut state = self.state.lock();
        // Pushing discards any forward entries, like a browser does.
        let keep = state.index + 1;
        state.entries.truncate(keep);
        state.entries.push(path.to_string());
        state.index = keep;
    }

    fn navigate(&self, path: &str) {
        self.replace(path);
    }

    fn add_traversal_handler(&self, handler: Weak<dyn TraversalHandler>) {
        self.handlers.lock().push(handler);
    }
}
