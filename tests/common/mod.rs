//! Common test utilities for notification integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use civic_notify::api::Recipients;
use civic_notify::backoff::Backoff;
use civic_notify::channel::ChannelHub;
use civic_notify::config::ChannelConfig;
use civic_notify::notification::Category;
use civic_notify::{
    EventProducer, Identity, InMemoryNotificationBackend, Notification, NotificationSession,
    NotificationStore, SyncConfig, UserId,
};

/// Config with millisecond reconnects so tests never wait on real backoff.
pub fn fast_config(max_reconnect_attempts: u32) -> SyncConfig {
    SyncConfig {
        channel: ChannelConfig {
            max_reconnect_attempts,
            reconnect: Backoff {
                base_delay_ms: 5,
                max_delay_ms: 20,
                jitter: false,
            },
            ..ChannelConfig::default()
        },
        poll_interval_secs: 1,
        ..SyncConfig::default()
    }
}

/// Authoritative notification created `minutes_ago`, with no viewer entries.
pub fn notification(id: &str, minutes_ago: i64) -> Notification {
    let mut n = Notification::new(id.into(), format!("message {id}"), Category::Update);
    n.created_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
    n
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// In-process backend, hub and producer with one client session on top.
pub struct Harness {
    pub backend: Arc<InMemoryNotificationBackend>,
    pub hub: ChannelHub,
    pub producer: EventProducer,
    pub store: Arc<NotificationStore>,
    pub session: NotificationSession,
}

impl Harness {
    pub async fn start(identity: Identity, config: SyncConfig, seed: Vec<Notification>) -> Self {
        let backend = Arc::new(InMemoryNotificationBackend::new());
        for notification in seed {
            backend.insert(notification, Recipients::Everyone).await;
        }
        Self::start_with(backend, identity, config).await
    }

    pub async fn start_with(
        backend: Arc<InMemoryNotificationBackend>,
        identity: Identity,
        config: SyncConfig,
    ) -> Self {
        let hub = ChannelHub::new();
        let store = Arc::new(NotificationStore::new());
        let session = NotificationSession::start(
            &config,
            Some(identity),
            backend.clone(),
            Box::new(hub.connect_local()),
            Arc::clone(&store),
        )
        .await;
        let producer = EventProducer::new(Arc::clone(&backend), hub.clone());
        Self {
            backend,
            hub,
            producer,
            store,
            session,
        }
    }

    pub fn user(&self) -> UserId {
        self.session
            .identity()
            .map(|identity| identity.user_id.clone())
            .expect("harness session has an identity")
    }

    pub async fn wait_registered(&self) {
        let user = self.user();
        let hub = self.hub.clone();
        wait_for("channel registration", move || hub.registered_count(&user) > 0).await;
    }
}
