//! Client-side session authority for the records portal.
//!
//! Decides, across any number of simultaneously open execution contexts
//! ("tabs") sharing one persisted key-value store, whether the user is
//! authenticated, what to do when a request fails with an authorization
//! error, and how to keep a logged-out user away from protected views.
//!
//! ## Layout
//! - [`auth`]: token codec, alias-group store, session state machine, expiry poller
//! - [`storage`]: the shared persisted store and its change notifications
//! - [`sync`]: cross-tab re-validation
//! - [`navigation`]: history primitive and the back-navigation guard
//! - [`gateway`]: outbound/inbound HTTP auth middleware and a reqwest wrapper
//! - [`context`]: one explicit object per execution context (no globals)

pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod navigation;
pub mod storage;
pub mod sync;

pub use auth::{Claims, ExpiryPoller, Session, SessionMachine, SessionStatus, SessionStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use context::SessionContext;
pub use error::{DecodeError, SessionError};
pub use gateway::{AuthorizedClient, PolicyOutcome, RequestAuthAttacher, ResponseAuthPolicy};
pub use navigation::{MemoryHistory, NavigationGuard, Navigator, TraversalDecision};
pub use storage::{ContextId, SharedStorage, StorageEvent, StorageHandle};
pub use sync::CrossTabSynchronizer;
