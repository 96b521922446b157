//! Outbound bearer attachment.

use crate::auth::SessionStore;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

/// Reads the current token for every request. A missing token sends the
/// request unmodified; some endpoints are public.
#[derive(Debug, Clone)]
pub struct RequestAuthAttacher {
    store: SessionStore,
}

impl RequestAuthAttacher {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// `Bearer <token>` for the current token, if there is a usable one.
    pub fn bearer_value(&self) -> Option<HeaderValue> {
        let token = self.store.read_token()?;
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                Some(value)
            }
            Err(_) => {
                tracing::warn!(
                    context = %self.store.context(),
                    "Stored token is not a valid header value; sending without it"
                );
                None
            }
        }
    }

    pub fn attach(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer_value() {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    /// Set the header in place. Returns whether a token was attached.
    pub fn attach_headers(&self, headers: &mut HeaderMap) -> bool {
        match self.bearer_value() {
            Some(value) => {
                headers.insert(AUTHORIZATION, value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRecord;
    use crate::config::AuthConfig;
    use crate::storage::{SharedStorage, StorageOp};

    fn attacher() -> (std::sync::Arc<SharedStorage>, RequestAuthAttacher) {
        let storage = SharedStorage::in_memory();
        let store = SessionStore::new(storage.handle(), &AuthConfig::default());
        (storage, RequestAuthAttacher::new(store))
    }

    #[test]
    fn attaches_bearer_when_token_present() {
        let (storage, attacher) = attacher();
        let store = SessionStore::new(storage.handle(), &AuthConfig::default());
        store.write_session(
            "abc.def.ghi",
            &UserRecord::try_from(serde_json::json!({ "id": 1 })).unwrap(),
        );

        let mut headers = HeaderMap::new();
        assert!(attacher.attach_headers(&mut headers));
        assert_eq!(headers[AUTHORIZATION], "Bearer abc.def.ghi");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn legacy_alias_token_is_used() {
        let (storage, attacher) = attacher();
        storage
            .handle()
            .apply(vec![StorageOp::set("authToken", "legacy")]);
        assert_eq!(attacher.bearer_value().unwrap(), "Bearer legacy");
    }

    #[test]
    fn no_token_leaves_request_alone() {
        let (_storage, attacher) = attacher();
        let mut headers = HeaderMap::new();
        assert!(!attacher.attach_headers(&mut headers));
        assert!(headers.is_empty());

        let request = attacher
            .attach(reqwest::Client::new().get("http://localhost/api/announcements"))
            .build()
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn builder_gets_header() {
        let (storage, attacher) = attacher();
        storage.handle().apply(vec![StorageOp::set("token", "t0k")]);
        let request = attacher
            .attach(reqwest::Client::new().get("http://localhost/api/residents"))
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer t0k");
    }

    #[test]
    fn token_with_newline_is_not_attached() {
        let (storage, attacher) = attacher();
        storage
            .handle()
            .apply(vec![StorageOp::set("token", "bad\ntoken")]);
        assert!(attacher.bearer_value().is_none());
    }
}
