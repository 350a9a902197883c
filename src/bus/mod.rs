//! In-process event bus for state-change signals.
//!
//! The notification store publishes a `NotificationsChanged` topic on every
//! accepted action, and the engine publishes display invalidations
//! (proposals, participants) for collaborators that own that data. UI
//! consumers subscribe here instead of polling the store.

mod event_bus;

pub use event_bus::{BusEvent, EventBus, Topic};
