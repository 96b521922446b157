//! Cross-tab session synchronization.
//!
//! Execution contexts share nothing but the persisted store and its change
//! notifications. Notifications carry no ordering guarantee relative to
//! other contexts' writes, so a receiver never trusts their payload; it
//! re-derives the session from the store instead.

pub mod cross_tab;

pub use cross_tab::{CrossTabSynchronizer, SyncTask};
