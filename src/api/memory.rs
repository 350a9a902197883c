use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ApiError, NotificationApi, NotificationPage};
use crate::notification::{is_unread, Notification, NotificationId, UserId};

/// Read entries shown in the recent scope, on top of every unread entry.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Who a stored notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    Everyone,
    Users(HashSet<UserId>),
}

impl Recipients {
    pub fn user(user: UserId) -> Self {
        Self::Users(HashSet::from([user]))
    }

    pub fn includes(&self, user: &UserId) -> bool {
        match self {
            Self::Everyone => true,
            Self::Users(users) => users.contains(user),
        }
    }
}

struct Record {
    notification: Notification,
    recipients: Recipients,
}

/// In-process Notification Store.
///
/// The recent scope returns every unread notification plus the newest
/// `recent_limit` entries, so the reported unread count always matches the
/// unread entries in the returned list, whichever scope is requested.
pub struct InMemoryNotificationBackend {
    records: RwLock<Vec<Record>>,
    recent_limit: usize,
    unavailable: AtomicBool,
}

impl InMemoryNotificationBackend {
    pub fn new() -> Self {
        Self::with_recent_limit(DEFAULT_RECENT_LIMIT)
    }

    pub fn with_recent_limit(recent_limit: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            recent_limit,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Durably record `notification`. An existing record with the same id is
    /// replaced.
    pub async fn insert(&self, notification: Notification, recipients: Recipients) {
        let mut records = self.records.write().await;
        records.retain(|record| record.notification.id != notification.id);
        records.push(Record {
            notification,
            recipients,
        });
    }

    pub async fn archive(&self, id: &NotificationId) -> Result<(), ApiError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|record| &record.notification.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        record.notification.archived = true;
        Ok(())
    }

    pub async fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| &record.notification.id == id)
            .map(|record| record.notification.clone())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Simulate an outage: every API call fails with a retryable error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), ApiError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApiError::Request("notification store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryNotificationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationApi for InMemoryNotificationBackend {
    async fn fetch_notifications(
        &self,
        user: &UserId,
        show_all: bool,
    ) -> Result<NotificationPage, ApiError> {
        self.ensure_available()?;
        let records = self.records.read().await;

        let mut visible: Vec<&Notification> = records
            .iter()
            .filter(|record| record.recipients.includes(user))
            .map(|record| &record.notification)
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let data: Vec<Notification> = visible
            .iter()
            .enumerate()
            .filter(|(rank, n)| show_all || *rank < self.recent_limit || is_unread(n, user))
            .map(|(_, n)| (*n).clone())
            .collect();
        let unread_count = visible.iter().filter(|n| is_unread(n, user)).count();

        Ok(NotificationPage { data, unread_count })
    }

    async fn mark_read(&self, id: &NotificationId, user: &UserId) -> Result<(), ApiError> {
        self.ensure_available()?;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|record| &record.notification.id == id && record.recipients.includes(user))
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        record.notification.set_read(user, true);
        Ok(())
    }

    async fn mark_all_read(&self, user: &UserId) -> Result<(), ApiError> {
        self.ensure_available()?;
        let mut records = self.records.write().await;
        for record in records.iter_mut() {
            if record.recipients.includes(user) && is_unread(&record.notification, user) {
                record.notification.set_read(user, true);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Category;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn aged(id: &str, minutes_ago: i64) -> Notification {
        let mut n = Notification::new(id.into(), format!("message {id}"), Category::Reminder);
        n.created_at = Utc::now() - Duration::minutes(minutes_ago);
        n
    }

    #[tokio::test]
    async fn fetch_is_scoped_and_newest_first() {
        let backend = InMemoryNotificationBackend::new();
        let me = UserId::from("me");
        backend.insert(aged("old", 30), Recipients::Everyone).await;
        backend.insert(aged("new", 1), Recipients::user(me.clone())).await;
        backend
            .insert(aged("theirs", 2), Recipients::user("them".into()))
            .await;

        let page = backend.fetch_notifications(&me, false).await.unwrap();
        let ids: Vec<&str> = page.data.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(page.unread_count, 2);
    }

    #[tokio::test]
    async fn recent_scope_keeps_all_unread() {
        let backend = InMemoryNotificationBackend::with_recent_limit(1);
        let me = UserId::from("me");
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            backend.insert(aged(id, i as i64), Recipients::Everyone).await;
        }
        backend.mark_read(&"b".into(), &me).await.unwrap();

        let recent = backend.fetch_notifications(&me, false).await.unwrap();
        let ids: Vec<&str> = recent.data.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(recent.unread_count, 2);

        let all = backend.fetch_notifications(&me, true).await.unwrap();
        assert_eq!(all.data.len(), 3);
        assert_eq!(all.unread_count, 2);
    }

    #[tokio::test]
    async fn mark_all_read_leaves_other_users_untouched() {
        let backend = InMemoryNotificationBackend::new();
        let me = UserId::from("me");
        let other = UserId::from("other");
        let mut shared = aged("shared", 1);
        shared.set_read(&other, false);
        backend.insert(shared, Recipients::Everyone).await;
        backend.insert(aged("mine", 2), Recipients::Everyone).await;

        backend.mark_all_read(&me).await.unwrap();

        let page = backend.fetch_notifications(&me, true).await.unwrap();
        assert_eq!(page.unread_count, 0);
        let shared = backend.get(&"shared".into()).await.unwrap();
        assert_eq!(shared.viewer(&other).map(|v| v.is_read), Some(false));
        assert_eq!(
            backend
                .fetch_notifications(&other, true)
                .await
                .unwrap()
                .unread_count,
            2
        );
    }

    #[tokio::test]
    async fn archived_entries_are_not_unread() {
        let backend = InMemoryNotificationBackend::new();
        backend.insert(aged("a", 1), Recipients::Everyone).await;
        backend.archive(&"a".into()).await.unwrap();
        let page = backend
            .fetch_notifications(&"me".into(), true)
            .await
            .unwrap();
        assert_eq!(page.unread_count, 0);
        assert_eq!(page.data.len(), 1);
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let backend = InMemoryNotificationBackend::new();
        backend.set_unavailable(true);
        let error = backend
            .fetch_notifications(&"me".into(), false)
            .await
            .unwrap_err();
        assert!(error.is_retryable());
        assert!(backend.mark_all_read(&"me".into()).await.is_err());
    }

    #[tokio::test]
    async fn mark_read_unknown_id_is_not_found() {
        let backend = InMemoryNotificationBackend::new();
        let error = backend
            .mark_read(&"ghost".into(), &"me".into())
            .await
            .unwrap_err();
        assert_eq!(error, ApiError::NotFound("ghost".to_string()));
    }
}
