//! The single owner of the reconciled notification list.
//!
//! Every mutation path (push-driven provisional entries, authoritative fetch
//! replacement, read-state marks) goes through `NotificationStore::dispatch`.
//! Instances are explicit and cheap, so tests build isolated stores instead of
//! sharing ambient state.

mod state;
mod notification_store;

pub use state::{Action, MarkStart, NotificationState};
pub use notification_store::NotificationStore;
