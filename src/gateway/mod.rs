//! Auth middleware around business-data HTTP calls.
//!
//! - `request`: attaches `Authorization: Bearer <token>` to outbound requests
//! - `response`: classifies 401/403 failures and decides the session action
//! - `client`: a `reqwest::Client` wrapper running both on every call

pub mod client;
pub mod request;
pub mod response;

pub use client::AuthorizedClient;
pub use request::RequestAuthAttacher;
pub use response::{AuthFailure, ErrorDetails, ExpiryClassifier, PolicyOutcome, ResponseAuthPolicy};
