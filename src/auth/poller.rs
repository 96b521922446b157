//! Periodic expiry re-check.
//!
//! Owned by whoever starts it and stopped deterministically through
//! [`ExpiryPoller::stop`] (or on drop), never by unmount ordering.

use super::session::{SessionMachine, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct ExpiryPoller {
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ExpiryPoller {
    /// Spawn the poll loop on the current tokio runtime.
    pub fn start(machine: Arc<SessionMachine>, period: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(Self::run(machine, period, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    async fn run(machine: Arc<SessionMachine>, period: Duration, mut stop_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; the mount-time check already ran.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let was = machine.status();
                    let authenticated = machine.check_auth();
                    if was == SessionStatus::Authenticated && !authenticated {
                        tracing::info!(
                            context = %machine.store().context(),
                            "Session expired while idle"
                        );
                    }
                }
                _ = stop_rx.recv() => {
                    tracing::debug!(context = %machine.store().context(), "Expiry poller stopped");
                    break;
                }
            }
        }
    }

    /// Stop the loop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ExpiryPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
