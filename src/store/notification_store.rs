use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::state::{Action, MarkStart, NotificationState};
use crate::bus::{BusEvent, EventBus, Topic};
use crate::notification::{NotificationId, UserId};

pub struct NotificationStore {
    state: Mutex<NotificationState>,
    bus: Arc<EventBus>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::with_bus(Arc::new(EventBus::new()))
    }

    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(NotificationState::default()),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationState> {
        // Reducer writes are never left half-applied.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cloned snapshot of the current state.
    pub fn get_state(&self) -> NotificationState {
        self.lock().clone()
    }

    /// Borrow the current state without cloning the list.
    pub fn read<R>(&self, f: impl FnOnce(&NotificationState) -> R) -> R {
        f(&self.lock())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run `action` through the reducer. Returns the resulting revision; a
    /// no-op action leaves the revision unchanged and publishes nothing.
    pub fn dispatch(&self, action: Action) -> u64 {
        let revision = {
            let mut state = self.lock();
            if !state.apply(action) {
                return state.revision;
            }
            state.revision += 1;
            state.revision
        };
        self.bus.emit(Topic::NotificationsChanged { revision });
        revision
    }

    /// Admit read marks for `ids`, applying the pending overlay to those that
    /// start. See [`MarkStart`].
    pub fn begin_marks(
        &self,
        ids: &[NotificationId],
        user: &UserId,
    ) -> Vec<(NotificationId, MarkStart)> {
        let (outcomes, revision) = {
            let mut state = self.lock();
            let outcomes = state.begin_marks(ids, user);
            if !outcomes.iter().any(|(_, start)| *start == MarkStart::Started) {
                return outcomes;
            }
            state.revision += 1;
            (outcomes, state.revision)
        };
        self.bus.emit(Topic::NotificationsChanged { revision });
        outcomes
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}
