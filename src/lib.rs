//! Real-time notification delivery and read-state reconciliation.
//!
//! A client session registers its `(user, role)` on a push channel, reacts to
//! push signals with provisional entries and authoritative refetches, and
//! tracks read marks in two phases so a failed mutation never looks persisted.
//!
//! # Architecture
//!
//! - `notification`: data model and the unread derivation
//! - `store`: explicit store (`get_state` / `subscribe` / `dispatch`)
//! - `bus`: typed broadcast bus behind `NotificationStore::subscribe`
//! - `api`: pull interface (HTTP client and in-memory backend)
//! - `channel`: push events, transports, edge hub and session loop
//! - `engine`: reconciliation and read-state tracking
//! - `producer`: edge-side event producers
//! - `session`: per-login lifecycle with pull-only fallback
//! - `config`: layered configuration

pub mod api;
pub mod backoff;
pub mod bus;
pub mod channel;
pub mod config;
pub mod engine;
pub mod notification;
pub mod producer;
pub mod session;
pub mod store;

pub use api::{ApiError, HttpNotificationApi, InMemoryNotificationBackend, NotificationApi};
pub use bus::{BusEvent, EventBus, Topic};
pub use channel::{ChannelError, ChannelHub, ChannelState, PushEvent};
pub use config::{ConfigError, SyncConfig};
pub use engine::{MarkOutcome, ReconciliationEngine, Selection};
pub use notification::{Identity, Notification, NotificationId, Role, UserId};
pub use producer::EventProducer;
pub use session::NotificationSession;
pub use store::{Action, NotificationState, NotificationStore};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
