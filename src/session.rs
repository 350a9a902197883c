//! Per-login notification session.
//!
//! Owns the push channel task and the reconciliation engine for one
//! authenticated identity. Nothing registers or fetches until an identity is
//! known, and teardown unregisters the channel and clears the list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::api::{HttpNotificationApi, NotificationApi};
use crate::channel::{ChannelSession, ChannelState, PushHandler, PushTransport, SseChannel};
use crate::config::SyncConfig;
use crate::engine::ReconciliationEngine;
use crate::notification::Identity;
use crate::store::NotificationStore;
use crate::NotifyError;

pub struct NotificationSession {
    identity: Option<Identity>,
    engine: Option<Arc<ReconciliationEngine>>,
    store: Arc<NotificationStore>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl NotificationSession {
    /// Start a session over the given pull API and push transport. With no
    /// identity the session stays idle: no registration, no fetch.
    ///
    /// The initial fetch is awaited so the first snapshot is already
    /// populated; a failure there is logged and the channel still starts.
    pub async fn start(
        config: &SyncConfig,
        identity: Option<Identity>,
        api: Arc<dyn NotificationApi>,
        transport: Box<dyn PushTransport>,
        store: Arc<NotificationStore>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let Some(identity) = identity else {
            info!("no authenticated user, notification session idle");
            return Self {
                identity: None,
                engine: None,
                store,
                shutdown,
                task: None,
            };
        };

        let engine = Arc::new(ReconciliationEngine::new(
            identity.user_id.clone(),
            api,
            Arc::clone(&store),
        ));
        // Errors are logged by the engine; the list simply starts empty.
        let _ = engine.fetch_notifications(false).await;

        let channel = ChannelSession::new(transport, identity.clone(), config.channel.clone());
        let task = tokio::spawn(run_channel(
            channel,
            Arc::clone(&engine),
            shutdown_rx,
            config.poll_interval(),
        ));
        info!(user = %identity.user_id, role = %identity.role, "notification session started");

        Self {
            identity: Some(identity),
            engine: Some(engine),
            store,
            shutdown,
            task: Some(task),
        }
    }

    /// Start a session against the configured HTTP API and SSE channel.
    pub async fn connect(config: &SyncConfig, identity: Option<Identity>) -> Result<Self, NotifyError> {
        config.validate()?;
        let api = Arc::new(HttpNotificationApi::new(&config.api)?);
        let transport = SseChannel::new(&config.channel, config.api.auth_token.as_deref())?;
        Ok(Self::start(
            config,
            identity,
            api,
            Box::new(transport),
            Arc::new(NotificationStore::new()),
        )
        .await)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// `None` while idle.
    pub fn engine(&self) -> Option<&Arc<ReconciliationEngine>> {
        self.engine.as_ref()
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|engine| !engine.is_retired())
    }

    /// Tear down: stop the channel (which unregisters), discard in-flight
    /// fetches and clear the list.
    pub async fn shutdown(mut self) {
        if let Some(engine) = &self.engine {
            engine.retire();
        }
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("notification channel task failed: {e}");
            }
        }
        if let Some(identity) = &self.identity {
            info!(user = %identity.user_id, "notification session closed");
        }
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_channel(
    channel: ChannelSession,
    engine: Arc<ReconciliationEngine>,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let handler: Arc<dyn PushHandler> = engine.clone();
    if channel.run(handler, shutdown.clone()).await == ChannelState::Degraded {
        poll(engine, shutdown, poll_interval).await;
    }
}

/// Pull-only fallback once the push channel is given up on.
async fn poll(
    engine: Arc<ReconciliationEngine>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    info!(?period, "push channel degraded, polling for notifications");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stop = tokio::select! {
            _ = ticker.tick() => false,
            changed = shutdown.changed() => changed.is_err(),
        };
        if stop || *shutdown.borrow() {
            break;
        }
        let _ = engine.refresh().await;
    }
}
