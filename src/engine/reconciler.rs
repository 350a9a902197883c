use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::dispatch::{plan, RefetchTarget};
use super::read_state::ReadStateTracker;
use crate::api::{ApiError, NotificationApi};
use crate::bus::Topic;
use crate::channel::{ChannelState, PushEvent, PushHandler};
use crate::notification::{visible_unread_count, UnreadSummary, UserId};
use crate::store::{Action, NotificationStore};

/// Combines provisional entries from push signals with authoritative fetches
/// into the store's list for one user.
///
/// Fetch results replace the list wholesale; whichever fetch completes last
/// wins. Results are discarded when the session was retired or the scope
/// changed while the request was in flight.
pub struct ReconciliationEngine {
    user: UserId,
    api: Arc<dyn NotificationApi>,
    store: Arc<NotificationStore>,
    show_all: AtomicBool,
    generation: AtomicU64,
    retired: AtomicBool,
    read_state: ReadStateTracker,
}

impl ReconciliationEngine {
    pub fn new(user: UserId, api: Arc<dyn NotificationApi>, store: Arc<NotificationStore>) -> Self {
        let read_state = ReadStateTracker::new(user.clone(), Arc::clone(&api), Arc::clone(&store));
        Self {
            user,
            api,
            store,
            show_all: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            read_state,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn read_state(&self) -> &ReadStateTracker {
        &self.read_state
    }

    pub fn show_all(&self) -> bool {
        self.show_all.load(Ordering::SeqCst)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Apply the side effects of one push event.
    pub async fn handle_push(&self, event: PushEvent) {
        if self.is_retired() {
            debug!(event = event.name(), "engine retired, dropping push event");
            return;
        }

        let plan = plan(&event, &self.user);
        if let Some(provisional) = plan.provisional {
            debug!(id = %provisional.id, "showing provisional notification");
            self.store.dispatch(Action::ProvisionalReceived(provisional));
        }

        for target in plan.refetch {
            match target {
                RefetchTarget::Notifications => {
                    // Failures are logged inside; the list is kept as is.
                    let _ = self.refresh().await;
                }
                RefetchTarget::Proposals { proposal_id } => {
                    self.store.bus().emit(Topic::ProposalsStale { proposal_id });
                }
                RefetchTarget::Participants { event_id } => {
                    self.store.bus().emit(Topic::ParticipantsStale { event_id });
                }
            }
        }
    }

    /// Fetch the authoritative list in the given scope and replace the local
    /// one. Returns `Ok(None)` when the result arrived too late to be used.
    pub async fn fetch_notifications(
        &self,
        show_all: bool,
    ) -> Result<Option<UnreadSummary>, ApiError> {
        if self.is_retired() {
            return Ok(None);
        }
        self.show_all.store(show_all, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        let confirmed_seq = self.store.read(|state| state.confirmed_seq());

        let page = match self.api.fetch_notifications(&self.user, show_all).await {
            Ok(page) => page,
            Err(e) => {
                warn!(user = %self.user, show_all, "fetch failed, keeping current list: {e}");
                return Err(e);
            }
        };

        if generation != self.generation.load(Ordering::SeqCst) || show_all != self.show_all() {
            debug!(user = %self.user, show_all, "discarding stale fetch result");
            return Ok(None);
        }

        let summary = UnreadSummary {
            reported: page.unread_count,
            visible: visible_unread_count(&page.data, &self.user),
        };
        if !summary.agrees() {
            warn!(
                user = %self.user,
                reported = summary.reported,
                visible = summary.visible,
                "server unread count disagrees with fetched list"
            );
        }

        let revision = self.store.dispatch(Action::FetchCompleted {
            notifications: page.data,
            unread_count: page.unread_count,
            show_all,
            confirmed_seq,
        });
        debug!(revision, unread = summary.reported, "notifications reconciled");
        Ok(Some(summary))
    }

    /// Refetch in the current scope.
    pub async fn refresh(&self) -> Result<Option<UnreadSummary>, ApiError> {
        self.fetch_notifications(self.show_all()).await
    }

    /// Switch between the recent scope and full history. Push registration
    /// is unaffected.
    pub async fn set_show_all(&self, show_all: bool) -> Result<Option<UnreadSummary>, ApiError> {
        info!(user = %self.user, show_all, "changing notification scope");
        self.fetch_notifications(show_all).await
    }

    /// Stop reconciling: in-flight fetches are discarded and the list is
    /// cleared.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.store.dispatch(Action::Cleared);
    }
}

#[async_trait]
impl PushHandler for ReconciliationEngine {
    async fn on_event(&self, event: PushEvent) {
        self.handle_push(event).await;
    }

    async fn on_state(&self, state: ChannelState) {
        self.store.bus().emit(Topic::ChannelStatus { state });
    }

    /// Anything produced before this registration was never pushed to us.
    async fn on_resync(&self) {
        let _ = self.refresh().await;
    }
}
