//! Pull interface to the Notification Store.
//!
//! `NotificationApi` is the seam the engine talks to. `HttpNotificationApi`
//! speaks the REST shape over reqwest; `InMemoryNotificationBackend` is a
//! complete in-process store with the same semantics, used by the edge
//! producer, offline runs and tests.

mod client;
mod error;
mod memory;

pub use client::{HttpNotificationApi, NotificationApi, NotificationPage};
pub use error::ApiError;
pub use memory::{InMemoryNotificationBackend, Recipients, DEFAULT_RECENT_LIMIT};
