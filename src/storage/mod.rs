//! Shared persisted key-value store.
//!
//! Models the browser-profile storage every execution context reads and
//! writes. One [`SharedStorage`] is shared through `Arc`; each context gets a
//! [`StorageHandle`] tagged with its own [`ContextId`].
//!
//! ## Guarantees
//! - A batch passed to [`StorageHandle::apply`] is applied under one write
//!   lock, so no reader ever observes half of it.
//! - A batch that changes at least one key broadcasts exactly one
//!   [`StorageEvent`]; a batch that changes nothing broadcasts nothing.
//! - Subscribers never see events their own context produced.
//! - Delivery order across contexts is not guaranteed to mean anything
//!   beyond last-write-wins on the store itself.
//! - Disk persistence happens after the write lock is released. Snapshots
//!   carry a revision and an older one never overwrites a newer one.

mod persist;

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the change notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identity of one execution context ("tab").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Set { key: String, value: String },
    Remove { key: String },
}

impl StorageOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }
}

/// Old/new value of one key touched by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Change notification for one applied batch.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub origin: ContextId,
    pub changes: Vec<KeyChange>,
}

impl StorageEvent {
    pub fn touches(&self, key: &str) -> bool {
        self.changes.iter().any(|c| c.key == key)
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum Notification {
    Changed(StorageEvent),
    /// The subscriber fell behind and `n` events were dropped.
    Missed(u64),
}

/// The store shared by every execution context.
pub struct SharedStorage {
    entries: RwLock<BTreeMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    next_context: AtomicU64,
    persist_path: Option<PathBuf>,
    /// Bumped under the write lock for every changing batch.
    revision: AtomicU64,
    /// Revision of the snapshot last written to disk.
    persisted: Mutex<u64>,
}

/// Snapshot taken under the write lock, saved after it is released.
struct PendingSave {
    revision: u64,
    entries: BTreeMap<String, String>,
}

impl SharedStorage {
    /// Volatile store, nothing written to disk.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::with_entries(BTreeMap::new(), None))
    }

    /// Store backed by a JSON snapshot file. A missing file starts empty.
    pub fn open(path: &Path) -> anyhow::Result<Arc<Self>> {
        let entries = persist::load(path)?;
        tracing::debug!(path = %path.display(), keys = entries.len(), "Shared storage opened");
        Ok(Arc::new(Self::with_entries(
            entries,
            Some(path.to_path_buf()),
        )))
    }

    fn with_entries(entries: BTreeMap<String, String>, persist_path: Option<PathBuf>) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(entries),
            events,
            next_context: AtomicU64::new(1),
            persist_path,
            revision: AtomicU64::new(0),
            persisted: Mutex::new(0),
        }
    }

    /// Register a new execution context.
    pub fn handle(self: &Arc<Self>) -> StorageHandle {
        let id = self.next_context.fetch_add(1, Ordering::Relaxed);
        StorageHandle {
            storage: Arc::clone(self),
            context: ContextId(id),
        }
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }

    fn apply_from(&self, origin: ContextId, ops: Vec<StorageOp>) -> Vec<KeyChange> {
        let mut entries = self.entries.write();
        let changes = self.apply_locked(&mut entries, origin, ops);
        let pending = self.pending_save(&entries, &changes);
        drop(entries);
        self.persist(pending);
        changes
    }

    fn apply_from_if(
        &self,
        origin: ContextId,
        expected: &[(&str, Option<&str>)],
        ops: Vec<StorageOp>,
    ) -> Option<Vec<KeyChange>> {
        let mut entries = self.entries.write();
        let unchanged = expected
            .iter()
            .all(|(key, value)| entries.get(*key).map(String::as_str) == *value);
        if !unchanged {
            return None;
        }
        let changes = self.apply_locked(&mut entries, origin, ops);
        let pending = self.pending_save(&entries, &changes);
        drop(entries);
        self.persist(pending);
        Some(changes)
    }

    /// Run `f` under the read lock if every `expected` key still holds the
    /// given value. No batch can land between the comparison and `f`.
    fn run_if<R>(&self, expected: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> Option<R> {
        let entries = self.entries.read();
        let unchanged = expected
            .iter()
            .all(|(key, value)| entries.get(*key).map(String::as_str) == *value);
        unchanged.then(f)
    }

    fn pending_save(
        &self,
        entries: &BTreeMap<String, String>,
        changes: &[KeyChange],
    ) -> Option<PendingSave> {
        if changes.is_empty() || self.persist_path.is_none() {
            return None;
        }
        Some(PendingSave {
            revision: self.revision.fetch_add(1, Ordering::Relaxed) + 1,
            entries: entries.clone(),
        })
    }

    fn persist(&self, pending: Option<PendingSave>) {
        let (Some(pending), Some(path)) = (pending, &self.persist_path) else {
            return;
        };
        // Saves are serialised; a snapshot older than the one on disk is dropped.
        let mut persisted = self.persisted.lock();
        if *persisted >= pending.revision {
            return;
        }
        match persist::save(path, &pending.entries) {
            Ok(()) => *persisted = pending.revision,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to persist shared storage: {e:#}");
            }
        }
    }

    fn apply_locked(
        &self,
        entries: &mut BTreeMap<String, String>,
        origin: ContextId,
        ops: Vec<StorageOp>,
    ) -> Vec<KeyChange> {
        let mut changes = Vec::new();

        for op in ops {
            let change = match op {
                StorageOp::Set { key, value } => {
                    let old = entries.insert(key.clone(), value.clone());
                    (old.as_deref() != Some(value.as_str())).then_some(KeyChange {
                        key,
                        old_value: old,
                        new_value: Some(value),
                    })
                }
                StorageOp::Remove { key } => entries.remove(&key).map(|old| KeyChange {
                    key,
                    old_value: Some(old),
                    new_value: None,
                }),
            };
            if let Some(change) = change {
                changes.push(change);
            }
        }

        if changes.is_empty() {
            return changes;
        }

        // Sent under the write lock so notification order matches write order.
        let _ = self.events.send(StorageEvent {
            origin,
            changes: changes.clone(),
        });
        changes
    }
}

/// A context-scoped view of the shared store.
#[derive(Clone)]
pub struct StorageHandle {
    storage: Arc<SharedStorage>,
    context: ContextId,
}

impl StorageHandle {
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.storage.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.entries.read().contains_key(key)
    }

    /// Read several keys under one lock acquisition.
    pub fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        let entries = self.storage.entries.read();
        keys.iter().map(|k| entries.get(*k).cloned()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.storage.entries.read().keys().cloned().collect()
    }

    /// Apply a batch atomically. Returns the keys whose value changed.
    pub fn apply(&self, ops: Vec<StorageOp>) -> Vec<KeyChange> {
        self.storage.apply_from(self.context, ops)
    }

    /// Apply a batch only if every `expected` key still holds the given value
    /// (`None` meaning absent). Returns `None` when the precondition failed.
    pub fn apply_if_unchanged(
        &self,
        expected: &[(&str, Option<&str>)],
        ops: Vec<StorageOp>,
    ) -> Option<Vec<KeyChange>> {
        self.storage.apply_from_if(self.context, expected, ops)
    }

    /// Run `f` only if every `expected` key still holds the given value,
    /// with writers from every context held off until `f` returns.
    /// `f` must not write to the store.
    pub fn with_unchanged<R>(
        &self,
        expected: &[(&str, Option<&str>)],
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        self.storage.run_if(expected, f)
    }

    /// Change notifications produced by other contexts.
    pub fn subscribe(&self) -> StorageSubscription {
        StorageSubscription {
            rx: self.storage.events.subscribe(),
            context: self.context,
        }
    }

    pub fn shared(&self) -> &Arc<SharedStorage> {
        &self.storage
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Receiver half of the change notification channel for one context.
pub struct StorageSubscription {
    rx: broadcast::Receiver<StorageEvent>,
    context: ContextId,
}

impl StorageSubscription {
    /// Next notification from another context, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.context => continue,
                Ok(event) => return Some(Notification::Changed(event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Notification::Missed(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.origin == self.context => continue,
                Ok(event) => return Some(Notification::Changed(event)),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Notification::Missed(n));
                }
                Err(_) => return None,
            }
        }
    }
}
