//! Two-phase read marks.
//!
//! A mark is applied locally as pending, then confirmed or reverted once the
//! server answers. Callers get a [`MarkOutcome`] that says whether the read
//! state was actually persisted.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::api::{ApiError, NotificationApi};
use crate::bus::Topic;
use crate::notification::{NotificationId, UserId};
use crate::store::{Action, MarkStart, NotificationStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The server accepted the mark.
    Confirmed,
    /// Nothing to do; the entry was already read for this user.
    AlreadyRead,
    /// An earlier mark on the same entry has not resolved yet.
    InFlight,
    NotFound,
    /// Provisional entries have no server id and cannot be marked.
    Provisional,
    /// The server call failed and the local mark was rolled back.
    Reverted(ApiError),
}

impl MarkOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, MarkOutcome::Confirmed | MarkOutcome::AlreadyRead)
    }
}

impl From<MarkStart> for MarkOutcome {
    fn from(start: MarkStart) -> Self {
        match start {
            MarkStart::Started | MarkStart::InFlight => MarkOutcome::InFlight,
            MarkStart::NotFound => MarkOutcome::NotFound,
            MarkStart::Provisional => MarkOutcome::Provisional,
            MarkStart::AlreadyRead => MarkOutcome::AlreadyRead,
        }
    }
}

/// Ids picked for a bulk action in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<NotificationId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, id: NotificationId) -> bool {
        self.ids.insert(id)
    }

    pub fn deselect(&mut self, id: &NotificationId) -> bool {
        self.ids.remove(id)
    }

    /// Flip `id`; returns whether it is selected afterwards.
    pub fn toggle(&mut self, id: NotificationId) -> bool {
        if self.ids.remove(&id) {
            return false;
        }
        self.ids.insert(id);
        true
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drain the selection in id order.
    pub fn take(&mut self) -> Vec<NotificationId> {
        std::mem::take(&mut self.ids).into_iter().collect()
    }
}

impl FromIterator<NotificationId> for Selection {
    fn from_iter<T: IntoIterator<Item = NotificationId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

pub struct ReadStateTracker {
    user: UserId,
    api: Arc<dyn NotificationApi>,
    store: Arc<NotificationStore>,
}

impl ReadStateTracker {
    pub fn new(user: UserId, api: Arc<dyn NotificationApi>, store: Arc<NotificationStore>) -> Self {
        Self { user, api, store }
    }

    /// Mark one entry read for the current user only.
    pub async fn mark_as_read(&self, id: &NotificationId) -> MarkOutcome {
        let start = self
            .store
            .begin_marks(std::slice::from_ref(id), &self.user)
            .pop()
            .map(|(_, start)| start)
            .unwrap_or(MarkStart::NotFound);
        if start != MarkStart::Started {
            debug!(id = %id, ?start, "mark skipped");
            return start.into();
        }

        match self.api.mark_read(id, &self.user).await {
            Ok(()) => {
                self.store.dispatch(Action::MarkConfirmed {
                    ids: vec![id.clone()],
                    user: self.user.clone(),
                });
                debug!(id = %id, "marked read");
                MarkOutcome::Confirmed
            }
            Err(e) => {
                if self.revert(vec![id.clone()], &e) {
                    MarkOutcome::Reverted(e)
                } else {
                    // A bulk mark confirmed this id while the request was out.
                    debug!(id = %id, "mark already covered by mark-all: {e}");
                    MarkOutcome::Confirmed
                }
            }
        }
    }

    /// Mark every unread, non-archived entry of the current user in one
    /// request. All targets are confirmed or reverted together.
    ///
    /// Entries whose single mark is still in flight are covered by the same
    /// request and confirmed with it; if that request fails they are left to
    /// their own mark to resolve.
    pub async fn mark_all_as_read(&self) -> MarkOutcome {
        let targets = self.store.read(|state| state.unread_targets(&self.user));
        let started: Vec<NotificationId> = self
            .store
            .begin_marks(&targets, &self.user)
            .into_iter()
            .filter(|(_, start)| *start == MarkStart::Started)
            .map(|(id, _)| id)
            .collect();
        let covered = self.store.read(|state| state.pending_ids(&self.user));
        if covered.is_empty() {
            debug!(user = %self.user, "nothing to mark read");
            return MarkOutcome::Confirmed;
        }

        match self.api.mark_all_read(&self.user).await {
            Ok(()) => {
                let count = covered.len();
                self.store.dispatch(Action::MarkConfirmed {
                    ids: covered,
                    user: self.user.clone(),
                });
                debug!(user = %self.user, count, "marked all read");
                MarkOutcome::Confirmed
            }
            Err(e) => {
                self.revert(started, &e);
                MarkOutcome::Reverted(e)
            }
        }
    }

    /// Mark each selected id independently and clear the selection whatever
    /// the individual outcomes are.
    pub async fn mark_selected(
        &self,
        selection: &mut Selection,
    ) -> Vec<(NotificationId, MarkOutcome)> {
        let ids = selection.take();
        let outcomes = join_all(ids.iter().map(|id| self.mark_as_read(id))).await;
        ids.into_iter().zip(outcomes).collect()
    }

    /// Roll back the marks in `ids` that are still pending. Returns `false`
    /// when none were left to roll back.
    fn revert(&self, ids: Vec<NotificationId>, error: &ApiError) -> bool {
        let ids: Vec<NotificationId> = self.store.read(|state| {
            ids.into_iter()
                .filter(|id| state.is_pending(id))
                .collect()
        });
        if ids.is_empty() {
            return false;
        }
        warn!(
            user = %self.user,
            count = ids.len(),
            "read mark failed, rolling back: {error}"
        );
        self.store.dispatch(Action::MarkReverted {
            ids: ids.clone(),
            user: self.user.clone(),
        });
        self.store.bus().emit(Topic::ReadStateReverted {
            ids,
            reason: error.to_string(),
        });
        true
    }
}
