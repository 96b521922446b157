//! Alias-group session store.
//!
//! The only component that reads or writes session keys in the shared store.
//! Each logical field (token, user record, role hint) is mirrored under an
//! ordered group of key names kept for backward compatibility with older
//! builds of the portal:
//!
//! | Field  | Keys (read priority)  |
//! |--------|-----------------------|
//! | token  | `token`, `authToken`  |
//! | user   | `user`, `userData`    |
//! | role   | `userRole`            |
//!
//! Every write sets every alias of a group and every clear removes every
//! alias of every group, both in a single storage batch, so no observer can
//! see one alias updated and its sibling stale.

use crate::config::AuthConfig;
use crate::error::SessionError;
use crate::storage::{ContextId, StorageHandle, StorageOp, StorageSubscription};
use serde::{Deserialize, Serialize};

/// Opaque user record; round-tripped as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRecord(serde_json::Map<String, serde_json::Value>);

impl UserRecord {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Parse stored text. Anything but a JSON object is malformed.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(SessionError::MalformedUserRecord(format!(
                "expected object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(SessionError::MalformedUserRecord(e.to_string())),
        }
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    /// The `role` field, when it is a non-empty string.
    pub fn role(&self) -> Option<&str> {
        self.0
            .get("role")
            .and_then(|v| v.as_str())
            .filter(|r| !r.is_empty())
    }

    fn to_json(&self) -> String {
        serde_json::Value::Object(self.0.clone()).to_string()
    }
}

impl TryFrom<serde_json::Value> for UserRecord {
    type Error = SessionError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(SessionError::MalformedUserRecord(format!(
                "expected object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Consistent view of every alias group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub token: Option<String>,
    pub user: Option<UserRecord>,
    pub role: Option<String>,
}

/// Raw alias values captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    entries: Vec<(String, Option<String>)>,
}

impl Observation {
    /// True iff no alias key was present.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_none())
    }

    fn expected(&self) -> Vec<(&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
            .collect()
    }
}

/// One logical field mirrored under several key names.
#[derive(Debug, Clone)]
struct AliasGroup {
    field: &'static str,
    keys: Vec<String>,
}

impl AliasGroup {
    fn new(field: &'static str, keys: Vec<String>) -> Self {
        Self { field, keys }
    }

    fn set_ops(&self, value: &str) -> impl Iterator<Item = StorageOp> + '_ {
        let value = value.to_string();
        self.keys
            .iter()
            .map(move |k| StorageOp::set(k.clone(), value.clone()))
    }

    fn remove_ops(&self) -> impl Iterator<Item = StorageOp> + '_ {
        self.keys.iter().map(|k| StorageOp::remove(k.clone()))
    }

    /// First present alias in priority order; no consistency check.
    fn first(&self, values: &[Option<String>]) -> Option<String> {
        values.iter().flatten().next().cloned()
    }

    /// Like [`first`](Self::first) but rejects aliases that disagree.
    fn resolve(&self, values: &[Option<String>]) -> Result<Option<String>, SessionError> {
        let mut present = values.iter().flatten();
        let Some(winner) = present.next() else {
            return Ok(None);
        };
        if present.any(|other| other != winner) {
            return Err(SessionError::AliasInconsistency { field: self.field });
        }
        Ok(Some(winner.clone()))
    }
}

/// Sole reader/writer of session keys in the shared store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    storage: StorageHandle,
    token: AliasGroup,
    user: AliasGroup,
    role: AliasGroup,
}

impl SessionStore {
    pub fn new(storage: StorageHandle, config: &AuthConfig) -> Self {
        Self {
            storage,
            token: AliasGroup::new("token", config.token_keys.clone()),
            user: AliasGroup::new("user", config.user_keys.clone()),
            role: AliasGroup::new("role", vec![config.role_key.clone()]),
        }
    }

    pub fn context(&self) -> ContextId {
        self.storage.context()
    }

    fn groups(&self) -> [&AliasGroup; 3] {
        [&self.token, &self.user, &self.role]
    }

    fn read_group(&self, group: &AliasGroup) -> Vec<Option<String>> {
        let keys: Vec<&str> = group.keys.iter().map(String::as_str).collect();
        self.storage.get_many(&keys)
    }

    /// Current token, primary alias first.
    pub fn read_token(&self) -> Option<String> {
        self.token
            .first(&self.read_group(&self.token))
            .filter(|t| !t.is_empty())
    }

    /// Current user record; `None` when absent or malformed.
    pub fn read_user(&self) -> Option<UserRecord> {
        let raw = self.user.first(&self.read_group(&self.user))?;
        match UserRecord::parse(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::debug!(context = %self.context(), "Ignoring stored user record: {e}");
                None
            }
        }
    }

    pub fn read_role(&self) -> Option<String> {
        self.role.first(&self.read_group(&self.role))
    }

    /// Raw values of every alias key, read under one lock acquisition.
    pub fn observe(&self) -> Observation {
        let keys = self.alias_keys();
        let values = self.storage.get_many(&keys);
        Observation {
            entries: keys
                .into_iter()
                .map(String::from)
                .zip(values)
                .collect(),
        }
    }

    /// Read every group in one lock acquisition, rejecting disagreeing aliases
    /// and malformed user records.
    pub fn snapshot(&self) -> Result<StoredSession, SessionError> {
        self.parse(&self.observe())
    }

    /// Interpret an observation. Fails on disagreeing aliases or a
    /// malformed user record.
    pub fn parse(&self, observation: &Observation) -> Result<StoredSession, SessionError> {
        let values: Vec<Option<String>> = observation
            .entries
            .iter()
            .map(|(_, v)| v.clone())
            .collect();

        let (token_vals, rest) = values.split_at(self.token.keys.len());
        let (user_vals, role_vals) = rest.split_at(self.user.keys.len());

        let token = self.token.resolve(token_vals)?.filter(|t| !t.is_empty());
        let user = self
            .user
            .resolve(user_vals)?
            .map(|raw| UserRecord::parse(&raw))
            .transpose()?;
        let role = self.role.resolve(role_vals)?;

        Ok(StoredSession { token, user, role })
    }

    /// Persist a fresh session across every alias, in one batch.
    pub fn write_session(&self, token: &str, user: &UserRecord) {
        let user_json = user.to_json();
        let mut ops: Vec<StorageOp> = self.token.set_ops(token).collect();
        ops.extend(self.user.set_ops(&user_json));
        match user.role() {
            Some(role) => ops.extend(self.role.set_ops(role)),
            None => ops.extend(self.role.remove_ops()),
        }

        let changed = self.storage.apply(ops);
        tracing::debug!(
            context = %self.context(),
            changed = changed.len(),
            "Session written to shared store"
        );
    }

    /// Remove every alias of every group, whether or not it is set.
    /// Returns whether anything was actually removed.
    pub fn clear(&self) -> bool {
        let ops: Vec<StorageOp> = self
            .groups()
            .into_iter()
            .flat_map(AliasGroup::remove_ops)
            .collect();
        let removed = self.storage.apply(ops);
        if !removed.is_empty() {
            tracing::debug!(
                context = %self.context(),
                removed = removed.len(),
                "Session keys cleared"
            );
        }
        !removed.is_empty()
    }

    /// Clear every alias, but only if the store still matches `observation`.
    ///
    /// Returns `None` when another context wrote in between, in which case
    /// nothing was removed and the caller should re-read.
    pub fn clear_if_unchanged(&self, observation: &Observation) -> Option<bool> {
        let expected = observation.expected();
        let ops: Vec<StorageOp> = self
            .groups()
            .into_iter()
            .flat_map(AliasGroup::remove_ops)
            .collect();
        let removed = self.storage.apply_if_unchanged(&expected, ops)?;
        if !removed.is_empty() {
            tracing::debug!(
                context = %self.context(),
                removed = removed.len(),
                "Stale session keys cleared"
            );
        }
        Some(!removed.is_empty())
    }

    /// Run `commit` only while the alias keys still match `observation`.
    ///
    /// Writers in every context wait until `commit` returns, so whatever it
    /// records about the store cannot go stale while it runs. `None` means
    /// the store moved on and the caller should re-read.
    pub fn commit_if_unchanged<R>(
        &self,
        observation: &Observation,
        commit: impl FnOnce() -> R,
    ) -> Option<R> {
        self.storage.with_unchanged(&observation.expected(), commit)
    }

    /// True iff no alias key of any group is present.
    pub fn is_empty(&self) -> bool {
        !self
            .groups()
            .iter()
            .flat_map(|g| g.keys.iter())
            .any(|k| self.storage.contains(k))
    }

    /// Whether `key` belongs to one of this store's alias groups.
    pub fn owns_key(&self, key: &str) -> bool {
        self.groups()
            .iter()
            .any(|g| g.keys.iter().any(|k| k == key))
    }

    /// Every alias key this store manages.
    pub fn alias_keys(&self) -> Vec<&str> {
        self.groups()
            .into_iter()
            .flat_map(|g| g.keys.iter().map(String::as_str))
            .collect()
    }

    pub fn subscribe(&self) -> StorageSubscription {
        self.storage.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Notification, SharedStorage};
    use serde_json::json;

    fn user(role: Option<&str>) -> UserRecord {
        let mut value = json!({ "id": 7, "name": "Juan Dela Cruz" });
        if let Some(role) = role {
            value["role"] = json!(role);
        }
        UserRecord::try_from(value).unwrap()
    }

    fn store() -> (std::sync::Arc<SharedStorage>, SessionStore) {
        let storage = SharedStorage::in_memory();
        let store = SessionStore::new(storage.handle(), &AuthConfig::default());
        (storage, store)
    }

    #[test]
    fn write_sets_every_alias() {
        let (storage, store) = store();
        store.write_session("tok", &user(Some("secretary")));

        let snapshot = storage.snapshot();
        assert_eq!(snapshot["token"], "tok");
        assert_eq!(snapshot["authToken"], "tok");
        assert_eq!(snapshot["user"], snapshot["userData"]);
        assert_eq!(snapshot["userRole"], "secretary");

        assert_eq!(store.read_token().as_deref(), Some("tok"));
        assert_eq!(store.read_user(), Some(user(Some("secretary"))));
        assert_eq!(store.read_role().as_deref(), Some("secretary"));
    }

    #[test]
    fn write_without_role_drops_stale_role_hint() {
        let (storage, store) = store();
        store.write_session("tok", &user(Some("admin")));
        store.write_session("tok2", &user(None));
        assert!(!storage.snapshot().contains_key("userRole"));
    }

    #[test]
    fn clear_removes_partial_groups() {
        let (storage, store) = store();
        let legacy = storage.handle();
        legacy.apply(vec![
            StorageOp::set("authToken", "old"),
            StorageOp::set("userRole", "captain"),
            StorageOp::set("theme", "dark"),
        ]);

        assert!(!store.is_empty());
        assert!(store.clear());
        assert!(store.is_empty());
        assert_eq!(storage.snapshot().len(), 1, "unrelated keys survive");
        assert!(!store.clear(), "second clear is a no-op");
    }

    #[test]
    fn read_prefers_primary_alias() {
        let (storage, store) = store();
        storage.handle().apply(vec![
            StorageOp::set("token", "primary"),
            StorageOp::set("authToken", "legacy"),
        ]);
        assert_eq!(store.read_token().as_deref(), Some("primary"));
    }

    #[test]
    fn read_falls_back_to_legacy_alias() {
        let (storage, store) = store();
        storage
            .handle()
            .apply(vec![StorageOp::set("userData", r#"{"id":1}"#)]);
        assert_eq!(store.read_user().unwrap().fields()["id"], 1);
        assert!(store.snapshot().unwrap().user.is_some());
    }

    #[test]
    fn snapshot_rejects_disagreeing_aliases() {
        let (storage, store) = store();
        storage.handle().apply(vec![
            StorageOp::set("token", "a"),
            StorageOp::set("authToken", "b"),
        ]);
        assert!(matches!(
            store.snapshot(),
            Err(SessionError::AliasInconsistency { field: "token" })
        ));
    }

    #[test]
    fn snapshot_rejects_malformed_user() {
        let (storage, store) = store();
        storage
            .handle()
            .apply(vec![StorageOp::set("user", "undefined")]);
        assert!(matches!(
            store.snapshot(),
            Err(SessionError::MalformedUserRecord(_))
        ));
        assert!(store.read_user().is_none());

        storage.handle().apply(vec![StorageOp::set("user", "[1]")]);
        assert!(matches!(
            store.snapshot(),
            Err(SessionError::MalformedUserRecord(_))
        ));
    }

    #[test]
    fn conditional_clear_backs_off_after_concurrent_write() {
        let (storage, store) = store();
        storage
            .handle()
            .apply(vec![StorageOp::set("token", "stale")]);
        let seen = store.observe();
        assert!(!seen.is_empty());

        // Another tab logs in before this one gets to clear.
        let other = SessionStore::new(storage.handle(), &AuthConfig::default());
        other.write_session("fresh", &user(None));

        assert_eq!(store.clear_if_unchanged(&seen), None);
        assert_eq!(store.read_token().as_deref(), Some("fresh"));

        let seen = store.observe();
        assert_eq!(store.clear_if_unchanged(&seen), Some(true));
        assert!(store.is_empty());
        assert!(store.observe().is_empty());
    }

    #[test]
    fn guarded_commit_refuses_stale_observation() {
        let (storage, store) = store();
        store.write_session("tok", &user(None));
        let seen = store.observe();

        assert_eq!(store.commit_if_unchanged(&seen, || "ok"), Some("ok"));

        let other = SessionStore::new(storage.handle(), &AuthConfig::default());
        other.clear();
        assert_eq!(store.commit_if_unchanged(&seen, || "ok"), None);
        assert_eq!(store.commit_if_unchanged(&store.observe(), || "ok"), Some("ok"));
    }

    #[test]
    fn write_emits_single_notification_to_other_contexts() {
        let (storage, store) = store();
        let mut other = storage.handle().subscribe();
        let mut own = store.subscribe();

        store.write_session("tok", &user(None));

        assert!(own.try_recv().is_none());
        match other.try_recv() {
            Some(Notification::Changed(event)) => {
                assert!(event.changes.iter().all(|c| store.owns_key(&c.key)));
            }
            other => panic!("expected change, got {other:?}"),
        }
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn owns_only_alias_keys() {
        let (_storage, store) = store();
        for key in store.alias_keys() {
            assert!(store.owns_key(key));
        }
        assert!(!store.owns_key("theme"));
    }
}
