//! Re-validates the local session whenever another context touches a
//! session alias key.

use crate::auth::SessionMachine;
use crate::storage::{Notification, StorageSubscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct CrossTabSynchronizer {
    machine: Arc<SessionMachine>,
}

impl CrossTabSynchronizer {
    pub fn new(machine: Arc<SessionMachine>) -> Self {
        Self { machine }
    }

    /// React to one notification. Returns whether a re-check ran.
    ///
    /// Old/new values in the event are ignored; they are a hint that
    /// something changed, not the truth about what the store holds now.
    pub fn handle(&self, notification: &Notification) -> bool {
        let store = self.machine.store();
        match notification {
            Notification::Changed(event) => {
                if !event.changes.iter().any(|c| store.owns_key(&c.key)) {
                    return false;
                }
                let authenticated = self.machine.check_auth();
                tracing::debug!(
                    context = %store.context(),
                    origin = %event.origin,
                    authenticated,
                    "Re-validated session after cross-tab change"
                );
                true
            }
            Notification::Missed(n) => {
                tracing::warn!(
                    context = %store.context(),
                    missed = n,
                    "Dropped storage notifications, re-validating"
                );
                self.machine.check_auth();
                true
            }
        }
    }

    /// Listen for other contexts' changes until stopped.
    ///
    /// The subscription is taken before this returns, so no change made
    /// after `spawn` is missed.
    pub fn spawn(self: Arc<Self>) -> SyncTask {
        let subscription = self.machine.store().subscribe();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(subscription, stop_rx));
        SyncTask {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut subscription: StorageSubscription,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let context = self.machine.store().context();
        loop {
            tokio::select! {
                notification = subscription.recv() => {
                    match notification {
                        Some(notification) => {
                            self.handle(&notification);
                        }
                        None => {
                            tracing::debug!(context = %context, "Shared storage closed");
                            break;
                        }
                    }
                }
                _ = stop_rx.recv() => {
                    tracing::debug!(context = %context, "Cross-tab synchronizer stopped");
                    break;
                }
            }
        }
    }
}

/// Handle to a running synchronizer loop.
pub struct SyncTask {
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncTask {
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
