use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::notification::{
    is_unread, visible_unread_count, Notification, NotificationId, Origin, UnreadSummary, UserId,
    Viewer,
};

/// A read mark applied locally but not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq)]
struct PendingMark {
    user: UserId,
    /// Viewer entry displaced by the mark; restored on revert.
    prior: Option<Viewer>,
}

/// A read mark the server accepted. Kept until a fetch issued after the
/// confirmation lands, since an older response may still predate it.
#[derive(Debug, Clone, PartialEq)]
struct ConfirmedMark {
    user: UserId,
    seq: u64,
}

/// How a requested read mark was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStart {
    /// Applied locally; the server call should follow.
    Started,
    NotFound,
    /// Provisional entries have no server identity yet.
    Provisional,
    /// Another mark on this id has not resolved.
    InFlight,
    AlreadyRead,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// An authoritative fetch resolved. Replaces the whole list.
    /// `confirmed_seq` is [`NotificationState::confirmed_seq`] as read when
    /// the request was issued.
    FetchCompleted {
        notifications: Vec<Notification>,
        unread_count: usize,
        show_all: bool,
        confirmed_seq: u64,
    },
    /// A push signal produced a provisional entry.
    ProvisionalReceived(Notification),
    MarkPending {
        ids: Vec<NotificationId>,
        user: UserId,
    },
    MarkConfirmed {
        ids: Vec<NotificationId>,
        user: UserId,
    },
    MarkReverted {
        ids: Vec<NotificationId>,
        user: UserId,
    },
    /// Session teardown.
    Cleared,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    pub notifications: Vec<Notification>,
    /// Unread count reported by the last authoritative fetch. Only a fetch
    /// writes this value.
    pub unread_count: usize,
    pub show_all: bool,
    pub revision: u64,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pending: HashMap<NotificationId, PendingMark>,
    confirmed: HashMap<NotificationId, ConfirmedMark>,
    confirmed_seq: u64,
}

impl NotificationState {
    pub fn find(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    fn find_mut(&mut self, id: &NotificationId) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| &n.id == id)
    }

    pub fn is_pending(&self, id: &NotificationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Non-archived ids with an unresolved mark by `user`.
    pub fn pending_ids(&self, user: &UserId) -> Vec<NotificationId> {
        self.pending
            .iter()
            .filter(|(id, mark)| {
                &mark.user == user && self.find(id).is_some_and(|n| !n.archived)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of mark confirmations applied so far. A fetch records this
    /// before it is issued.
    pub fn confirmed_seq(&self) -> u64 {
        self.confirmed_seq
    }

    pub fn provisional_count(&self) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.is_provisional())
            .count()
    }

    pub fn is_unread(&self, id: &NotificationId, user: &UserId) -> Option<bool> {
        self.find(id).map(|n| is_unread(n, user))
    }

    pub fn visible_unread(&self, user: &UserId) -> usize {
        visible_unread_count(&self.notifications, user)
    }

    pub fn unread_summary(&self, user: &UserId) -> UnreadSummary {
        UnreadSummary {
            reported: self.unread_count,
            visible: self.visible_unread(user),
        }
    }

    /// Authoritative entries that are unread for `user` and not already being
    /// marked.
    pub fn unread_targets(&self, user: &UserId) -> Vec<NotificationId> {
        self.notifications
            .iter()
            .filter(|n| !n.is_provisional() && !self.pending.contains_key(&n.id))
            .filter(|n| is_unread(n, user))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Classify each id and apply a pending mark to the ones that can start.
    /// Runs under the same lock as the write so two callers never both start
    /// a mark on one id.
    pub(crate) fn begin_marks(
        &mut self,
        ids: &[NotificationId],
        user: &UserId,
    ) -> Vec<(NotificationId, MarkStart)> {
        let mut started = Vec::new();
        let outcomes = ids
            .iter()
            .map(|id| {
                let start = match self.find(id) {
                    None => MarkStart::NotFound,
                    Some(n) if n.is_provisional() => MarkStart::Provisional,
                    Some(_) if self.pending.contains_key(id) || started.contains(id) => {
                        MarkStart::InFlight
                    }
                    Some(n) if n.viewer(user).is_some_and(|v| v.is_read) => MarkStart::AlreadyRead,
                    Some(_) => {
                        started.push(id.clone());
                        MarkStart::Started
                    }
                };
                (id.clone(), start)
            })
            .collect();

        if !started.is_empty() {
            self.apply(Action::MarkPending {
                ids: started,
                user: user.clone(),
            });
        }
        outcomes
    }

    /// Apply `action`. Returns `false` when the action changed nothing.
    pub(crate) fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::FetchCompleted {
                notifications,
                unread_count,
                show_all,
                confirmed_seq,
            } => {
                self.notifications = notifications;
                self.unread_count = unread_count;
                self.show_all = show_all;
                self.last_fetched_at = Some(Utc::now());
                self.overlay_confirmed(confirmed_seq);
                self.overlay_pending();
                true
            }
            Action::ProvisionalReceived(mut notification) => {
                if self.find(&notification.id).is_some() {
                    return false;
                }
                notification.origin = Origin::Provisional;
                self.notifications.insert(0, notification);
                true
            }
            Action::MarkPending { ids, user } => {
                let mut changed = false;
                for id in ids {
                    if self.pending.contains_key(&id) {
                        continue;
                    }
                    let Some(notification) = self.find_mut(&id) else {
                        continue;
                    };
                    let prior = notification.set_read(&user, true);
                    self.pending.insert(
                        id,
                        PendingMark {
                            user: user.clone(),
                            prior,
                        },
                    );
                    changed = true;
                }
                changed
            }
            Action::MarkConfirmed { ids, user } => {
                let mut changed = false;
                for id in ids {
                    changed |= self.pending.remove(&id).is_some();
                    self.confirmed_seq += 1;
                    self.confirmed.insert(
                        id.clone(),
                        ConfirmedMark {
                            user: user.clone(),
                            seq: self.confirmed_seq,
                        },
                    );
                    if let Some(notification) = self.find_mut(&id) {
                        let was_read = notification.viewer(&user).is_some_and(|v| v.is_read);
                        if !was_read {
                            notification.set_read(&user, true);
                            changed = true;
                        }
                    }
                }
                changed
            }
            Action::MarkReverted { ids, user } => {
                let mut changed = false;
                for id in ids {
                    let Some(mark) = self.pending.remove(&id) else {
                        continue;
                    };
                    if let Some(notification) = self.find_mut(&id) {
                        notification.restore_viewer(&user, mark.prior);
                    }
                    changed = true;
                }
                changed
            }
            Action::Cleared => {
                let revision = self.revision;
                let confirmed_seq = self.confirmed_seq;
                *self = Self::default();
                self.revision = revision;
                self.confirmed_seq = confirmed_seq;
                true
            }
        }
    }

    /// Re-apply confirmations newer than the fetch that produced the list,
    /// and forget the ones it already reflects.
    fn overlay_confirmed(&mut self, fetch_seq: u64) {
        self.confirmed.retain(|_, mark| mark.seq > fetch_seq);
        for (id, mark) in &self.confirmed {
            if let Some(notification) = self.notifications.iter_mut().find(|n| &n.id == id) {
                notification.set_read(&mark.user, true);
            }
        }
    }

    /// Re-apply in-flight marks to a freshly fetched list so a full
    /// replacement never hides the user's own action. The server's entry
    /// becomes the new rollback target.
    fn overlay_pending(&mut self) {
        let pending: Vec<(NotificationId, UserId)> = self
            .pending
            .iter()
            .map(|(id, mark)| (id.clone(), mark.user.clone()))
            .collect();

        for (id, user) in pending {
            let Some(notification) = self.notifications.iter_mut().find(|n| n.id == id) else {
                continue;
            };
            let prior = notification.set_read(&user, true);
            if let Some(mark) = self.pending.get_mut(&id) {
                mark.prior = prior;
            }
        }
    }
}
