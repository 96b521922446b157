//! `reqwest::Client` wrapper that runs the auth middleware on every call.

use super::request::RequestAuthAttacher;
use super::response::{AuthFailure, ErrorDetails, ResponseAuthPolicy};
use crate::error::SessionError;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Business-data HTTP client for one execution context.
pub struct AuthorizedClient {
    http: reqwest::Client,
    base_url: String,
    attacher: RequestAuthAttacher,
    policy: Arc<ResponseAuthPolicy>,
}

impl AuthorizedClient {
    pub fn new(
        base_url: impl Into<String>,
        attacher: RequestAuthAttacher,
        policy: Arc<ResponseAuthPolicy>,
    ) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(http, base_url, attacher, policy))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        attacher: RequestAuthAttacher,
        policy: Arc<ResponseAuthPolicy>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            attacher,
            policy,
        }
    }

    /// Start a request against `base_url + path`.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Attach the bearer, send, and run the response policy.
    ///
    /// 401/403 come back as [`SessionError::AuthorizationFailure`] carrying
    /// the outcome the policy chose; every other status is returned as-is.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SessionError> {
        let request = self.attacher.attach(request).build()?;
        let path = request.url().path().to_string();
        let response = self.http.execute(request).await?;

        let status = response.status().as_u16();
        if status != 401 && status != 403 {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(status, path = %path, "Could not read error body: {e}");
                String::new()
            }
        };
        let outcome = self.policy.evaluate(&AuthFailure {
            status,
            request_path: &path,
            body: &body,
        });
        let message = ErrorDetails::parse(&body).message;

        Err(SessionError::AuthorizationFailure {
            status,
            message,
            outcome,
        })
    }

    /// `GET path` and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let response = self.send(self.get(path)).await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
