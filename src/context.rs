//! One execution context ("tab") over a shared store.
//!
//! Everything a tab needs is built here and passed explicitly; there is no
//! process-wide session singleton. Several `SessionContext`s over one
//! [`SharedStorage`] behave like several open tabs of the same profile.

use crate::auth::{ExpiryPoller, SessionMachine, SessionStatus, SessionStore};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::SessionError;
use crate::gateway::{AuthorizedClient, RequestAuthAttacher, ResponseAuthPolicy};
use crate::navigation::{NavigationGuard, Navigator};
use crate::storage::{ContextId, SharedStorage};
use crate::sync::{CrossTabSynchronizer, SyncTask};
use std::sync::Arc;

pub struct SessionContext {
    config: Arc<AuthConfig>,
    navigator: Arc<dyn Navigator>,
    machine: Arc<SessionMachine>,
    attacher: RequestAuthAttacher,
    policy: Arc<ResponseAuthPolicy>,
    // Navigators hold handlers weakly; this keeps the guard registered.
    _guard: Arc<NavigationGuard>,
    sync_task: Option<SyncTask>,
    poller: Option<ExpiryPoller>,
}

impl SessionContext {
    /// Build a context and run the initial session check.
    pub fn new(
        storage: Arc<SharedStorage>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
        config: Arc<AuthConfig>,
    ) -> Self {
        let store = SessionStore::new(storage.handle(), &config);
        let machine = Arc::new(SessionMachine::new(
            store.clone(),
            clock,
            Arc::clone(&navigator),
            config.login_path.clone(),
        ));
        let guard = NavigationGuard::install(Arc::clone(&machine), Arc::clone(&navigator));
        let attacher = RequestAuthAttacher::new(store);
        let policy = Arc::new(ResponseAuthPolicy::new(
            Arc::clone(&machine),
            Arc::clone(&navigator),
            Arc::clone(&config),
        ));

        let authenticated = machine.check_auth();
        tracing::debug!(
            context = %machine.store().context(),
            location = %navigator.current_path(),
            authenticated,
            "Session context ready"
        );

        Self {
            config,
            navigator,
            machine,
            attacher,
            policy,
            _guard: guard,
            sync_task: None,
            poller: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.machine.store().context()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn machine(&self) -> &Arc<SessionMachine> {
        &self.machine
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn status(&self) -> SessionStatus {
        self.machine.status()
    }

    pub fn attacher(&self) -> &RequestAuthAttacher {
        &self.attacher
    }

    pub fn policy(&self) -> &Arc<ResponseAuthPolicy> {
        &self.policy
    }

    /// HTTP client whose requests carry this context's token and whose
    /// 401/403 responses run this context's policy.
    pub fn client(&self, base_url: impl Into<String>) -> Result<AuthorizedClient, SessionError> {
        AuthorizedClient::new(base_url, self.attacher.clone(), Arc::clone(&self.policy))
    }

    /// Spawn the cross-tab listener and, when configured, the expiry poller.
    /// Must be called from within a tokio runtime. Calling it again while
    /// running is a no-op.
    pub fn start_background(&mut self) {
        if self.sync_task.is_none() {
            let sync = Arc::new(CrossTabSynchronizer::new(Arc::clone(&self.machine)));
            self.sync_task = Some(sync.spawn());
        }
        if self.poller.is_none() {
            if let Some(period) = self.config.poll_interval() {
                self.poller = Some(ExpiryPoller::start(Arc::clone(&self.machine), period));
            }
        }
        tracing::debug!(
            context = %self.id(),
            polling = self.poller.is_some(),
            "Background session tasks started"
        );
    }

    pub fn is_background_running(&self) -> bool {
        self.sync_task.is_some()
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.stop().await;
        }
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
        tracing::debug!(context = %self.id(), "Session context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{encode_unsigned, Claims};
    use crate::auth::UserRecord;
    use crate::clock::ManualClock;
    use crate::navigation::{MemoryHistory, TraversalDecision};
    use std::time::Duration;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn token_expiring_in(secs: i64) -> String {
        encode_unsigned(&Claims {
            expires_at_epoch_seconds: NOW_MS / 1000 + secs,
            extra: serde_json::Map::new(),
        })
        .unwrap()
    }

    fn user() -> UserRecord {
        UserRecord::try_from(serde_json::json!({ "id": 1, "role": "captain" })).unwrap()
    }

    fn tab(
        storage: &Arc<SharedStorage>,
        clock: &Arc<ManualClock>,
        config: &Arc<AuthConfig>,
        location: &str,
    ) -> (SessionContext, Arc<MemoryHistory>) {
        let history = MemoryHistory::new(location);
        let ctx = SessionContext::new(
            Arc::clone(storage),
            history.clone(),
            clock.clone(),
            Arc::clone(config),
        );
        (ctx, history)
    }

    #[test]
    fn new_context_runs_initial_check() {
        let storage = SharedStorage::in_memory();
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let config = Arc::new(AuthConfig::default());

        let (empty, _) = tab(&storage, &clock, &config, "/");
        assert_eq!(empty.status(), SessionStatus::Unauthenticated);

        assert!(empty.machine().login(&token_expiring_in(600), &user()));
        let (second, _) = tab(&storage, &clock, &config, "/dashboard");
        assert_eq!(second.status(), SessionStatus::Authenticated);
        assert_ne!(empty.id(), second.id());
    }

    #[test]
    fn guard_stays_installed_for_context_lifetime() {
        let storage = SharedStorage::in_memory();
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let config = Arc::new(AuthConfig::default());
        let (ctx, history) = tab(&storage, &clock, &config, "/");

        history.push("/dashboard");
        assert_eq!(history.back(), TraversalDecision::Cancel);
        assert_eq!(history.current_path(), "/login");
        drop(ctx);

        history.push("/residents");
        assert_eq!(history.back(), TraversalDecision::Allow);
    }

    #[tokio::test]
    async fn background_sync_follows_other_tab() {
        let storage = SharedStorage::in_memory();
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let config = Arc::new(AuthConfig::default());
        let (tab_a, _) = tab(&storage, &clock, &config, "/dashboard");
        let (mut tab_b, history_b) = tab(&storage, &clock, &config, "/dashboard");

        assert!(tab_a.machine().login(&token_expiring_in(600), &user()));
        assert!(tab_b.machine().check_auth());

        let mut status_b = tab_b.machine().subscribe();
        tab_b.start_background();
        assert!(tab_b.is_background_running());

        tab_a.machine().logout();
        tokio::time::timeout(Duration::from_secs(5), status_b.changed())
            .await
            .expect("tab B should react")
            .unwrap();
        assert_eq!(tab_b.status(), SessionStatus::Unauthenticated);
        // Synchronisation alone never navigates.
        assert_eq!(history_b.current_path(), "/dashboard");

        tab_b.shutdown().await;
        assert!(!tab_b.is_background_running());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_poller_catches_idle_expiry() {
        let storage = SharedStorage::in_memory();
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let config = Arc::new(AuthConfig {
            poll_interval_secs: Some(30),
            ..AuthConfig::default()
        });
        let (mut ctx, _) = tab(&storage, &clock, &config, "/dashboard");
        assert!(ctx.machine().login(&token_expiring_in(45), &user()));
        ctx.start_background();

        clock.advance_secs(60);
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(ctx.status(), SessionStatus::Unauthenticated);
        assert!(storage.snapshot().is_empty());
        ctx.shutdown().await;
    }
}
