//! Session authority for one execution context.
//!
//! Provides:
//! - Offline bearer-token claim decoding (`token`)
//! - The alias-group store, sole owner of session keys in shared storage (`store`)
//! - The `Unknown → Authenticated/Unauthenticated` state machine (`session`)
//! - An optional periodic expiry re-check (`poller`)
//!
//! ## Design Decisions
//! - No signature verification client-side: the server validates every
//!   request; the client only needs `exp` to avoid sending a dead token.
//! - Legacy key aliases live behind one abstraction so no call site can
//!   update one alias and forget its sibling.

pub mod poller;
pub mod session;
pub mod store;
pub mod token;

pub use poller::ExpiryPoller;
pub use session::{Session, SessionMachine, SessionStatus};
pub use store::{Observation, SessionStore, StoredSession, UserRecord};
pub use token::Claims;
