//! Push channel session loop.
//!
//! Connects, registers the identity, and turns inbound frames into decoded
//! [`PushEvent`]s for a [`PushHandler`]. Drops are retried with backoff and a
//! fresh registration; after too many consecutive connect failures the loop
//! reports [`ChannelState::Degraded`] and returns.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::event::PushEvent;
use super::transport::{ChannelError, ChannelState, InboundFrame, OutboundFrame, PushTransport};
use crate::config::ChannelConfig;
use crate::notification::Identity;

/// Receives decoded events and state transitions from a [`ChannelSession`].
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Runs on its own task; a slow or panicking handler never holds up the
    /// next frame.
    async fn on_event(&self, event: PushEvent);

    async fn on_state(&self, _state: ChannelState) {}

    /// Called on its own task after every successful registration, the
    /// first included. Events sent before it were not delivered here.
    async fn on_resync(&self) {}
}

/// Bounded memory of frame ids already delivered.
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `false` if `id` was already recorded.
    fn insert(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

enum Pump {
    Shutdown,
    Dropped,
}

pub struct ChannelSession {
    transport: Box<dyn PushTransport>,
    identity: Identity,
    config: ChannelConfig,
    recent: RecentIds,
}

impl ChannelSession {
    pub fn new(transport: Box<dyn PushTransport>, identity: Identity, config: ChannelConfig) -> Self {
        let recent = RecentIds::new(config.dedupe_window);
        Self {
            transport,
            identity,
            config,
            recent,
        }
    }

    /// Drive the channel until `shutdown` flips to `true` or reconnects are
    /// exhausted. Returns the final state (`Closed` or `Degraded`).
    pub async fn run(
        mut self,
        handler: Arc<dyn PushHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ChannelState {
        let mut failures: u32 = 0;
        let mut connected_before = false;

        loop {
            if *shutdown.borrow() {
                return self.close(&handler).await;
            }

            let attempt_state = if connected_before || failures > 0 {
                ChannelState::Reconnecting
            } else {
                ChannelState::Connecting
            };
            handler.on_state(attempt_state).await;

            match self.establish().await {
                Ok(()) => {
                    failures = 0;
                    connected_before = true;
                    info!(user = %self.identity.user_id, role = %self.identity.role, "push channel registered");
                    handler.on_state(ChannelState::Connected).await;
                    let resync = Arc::clone(&handler);
                    tokio::spawn(async move {
                        resync.on_resync().await;
                    });

                    match self.pump(&handler, &mut shutdown).await {
                        Pump::Shutdown => return self.close(&handler).await,
                        Pump::Dropped => warn!("push channel dropped, reconnecting"),
                    }
                }
                Err(e) => {
                    failures += 1;
                    if !e.is_retryable() || failures > self.config.max_reconnect_attempts {
                        error!(failures, "push channel unavailable: {e}; falling back to pull-only");
                        if let Err(e) = self.transport.close().await {
                            debug!("failed to close transport: {e}");
                        }
                        handler.on_state(ChannelState::Degraded).await;
                        return ChannelState::Degraded;
                    }
                    warn!(
                        attempt = failures,
                        max = self.config.max_reconnect_attempts,
                        "push channel connect failed: {e}"
                    );
                }
            }

            let delay = self.config.reconnect.delay(failures.saturating_sub(1));
            debug!(?delay, "waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return self.close(&handler).await;
                    }
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<(), ChannelError> {
        self.transport.connect().await?;
        self.transport
            .send(OutboundFrame::register(&self.identity))
            .await
    }

    async fn pump(
        &mut self,
        handler: &Arc<dyn PushHandler>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Pump {
        loop {
            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Pump::Shutdown;
                    }
                    None
                }
                frame = self.transport.recv() => Some(frame),
            };

            let Some(frame) = received else {
                if *shutdown.borrow() {
                    return Pump::Shutdown;
                }
                continue;
            };

            match frame {
                Ok(Some(frame)) => self.deliver(handler, frame),
                Ok(None) => return Pump::Dropped,
                Err(e) => {
                    warn!("push channel read failed: {e}");
                    return Pump::Dropped;
                }
            }
        }
    }

    fn deliver(&mut self, handler: &Arc<dyn PushHandler>, frame: InboundFrame) {
        if let Some(id) = &frame.id {
            if !self.recent.insert(id) {
                debug!(frame = %id, "skipping duplicate frame");
                return;
            }
        }

        let event = PushEvent::decode(&frame.event, &frame.data);
        if let PushEvent::Unknown { name } = &event {
            debug!(event = %name, "ignoring unrecognized push event");
            return;
        }

        debug!(event = event.name(), "dispatching push event");
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            handler.on_event(event).await;
        });
    }

    async fn close(mut self, handler: &Arc<dyn PushHandler>) -> ChannelState {
        if self.transport.state() == ChannelState::Connected {
            if let Err(e) = self
                .transport
                .send(OutboundFrame::unregister(&self.identity))
                .await
            {
                debug!("failed to unregister: {e}");
            }
        }
        if let Err(e) = self.transport.close().await {
            debug!("failed to close transport: {e}");
        }
        info!(user = %self.identity.user_id, "push channel closed");
        handler.on_state(ChannelState::Closed).await;
        ChannelState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::channel::{Audience, ChannelHub};
    use crate::notification::Role;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    struct Recorder {
        events: mpsc::UnboundedSender<PushEvent>,
        states: Mutex<Vec<ChannelState>>,
        resyncs: AtomicUsize,
        resync_gate: Semaphore,
    }

    #[async_trait]
    impl PushHandler for Recorder {
        async fn on_event(&self, event: PushEvent) {
            let _ = self.events.send(event);
        }

        async fn on_state(&self, state: ChannelState) {
            self.states.lock().unwrap().push(state);
        }

        async fn on_resync(&self) {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
            let _permit = self.resync_gate.acquire().await;
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Recorder {
                events: tx,
                states: Mutex::new(Vec::new()),
                resyncs: AtomicUsize::new(0),
                resync_gate: Semaphore::new(0),
            }),
            rx,
        )
    }

    fn fast_config(max_reconnect_attempts: u32) -> ChannelConfig {
        ChannelConfig {
            max_reconnect_attempts,
            reconnect: Backoff {
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter: false,
            },
            ..ChannelConfig::default()
        }
    }

    async fn wait_registered(hub: &ChannelHub, user: &str) {
        for _ in 0..200 {
            if hub.registered_count(&user.into()) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{user} never registered");
    }

    #[test]
    fn recent_ids_evicts_oldest() {
        let mut recent = RecentIds::new(2);
        assert!(recent.insert("a"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(recent.insert("c"));
        assert!(recent.insert("a"));
    }

    #[tokio::test]
    async fn registers_and_dispatches_decoded_events() {
        let hub = ChannelHub::new();
        let identity = Identity::new("u1", Role::Participant);
        let session = ChannelSession::new(Box::new(hub.connect_local()), identity, fast_config(3));
        let (handler, mut events) = recorder();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(session.run(handler.clone(), shutdown_rx));
        wait_registered(&hub, "u1").await;

        hub.publish(&[Audience::User("u1".into())], &PushEvent::RefreshNotifications);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PushEvent::RefreshNotifications);

        shutdown_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), ChannelState::Closed);
        assert_eq!(hub.connection_count(), 0);
        let states = handler.states.lock().unwrap().clone();
        assert_eq!(states.first(), Some(&ChannelState::Connecting));
        assert_eq!(states.last(), Some(&ChannelState::Closed));
    }

    #[tokio::test]
    async fn slow_resync_does_not_hold_up_frames() {
        let hub = ChannelHub::new();
        let session = ChannelSession::new(
            Box::new(hub.connect_local()),
            Identity::new("u1", Role::Participant),
            fast_config(3),
        );
        let (handler, mut events) = recorder();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(session.run(handler.clone(), shutdown_rx));
        wait_registered(&hub, "u1").await;

        // The resync never finishes; frames must still flow.
        hub.publish(&[Audience::User("u1".into())], &PushEvent::RefreshNotifications);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PushEvent::RefreshNotifications);
        assert_eq!(handler.resyncs.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), ChannelState::Closed);
        handler.resync_gate.close();
    }

    #[tokio::test]
    async fn reconnects_and_registers_again_after_drop() {
        let hub = ChannelHub::new();
        let identity = Identity::new("u1", Role::Staff);
        let session = ChannelSession::new(Box::new(hub.connect_local()), identity, fast_config(3));
        let (handler, mut events) = recorder();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(session.run(handler.clone(), shutdown_rx));
        wait_registered(&hub, "u1").await;

        // Drop every connection; the session must come back on its own.
        hub.set_accepting(false);
        hub.set_accepting(true);
        wait_registered(&hub, "u1").await;

        hub.publish(&[Audience::Role(Role::Staff)], &PushEvent::RefreshNotifications);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PushEvent::RefreshNotifications);
        assert_eq!(hub.registered_count(&"u1".into()), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(handler
            .states
            .lock()
            .unwrap()
            .contains(&ChannelState::Reconnecting));
    }

    #[tokio::test]
    async fn degrades_after_exhausting_reconnects() {
        let hub = ChannelHub::new();
        hub.set_accepting(false);
        let session = ChannelSession::new(
            Box::new(hub.connect_local()),
            Identity::new("u1", Role::Staff),
            fast_config(2),
        );
        let (handler, _events) = recorder();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = session.run(handler.clone(), shutdown_rx).await;

        assert_eq!(state, ChannelState::Degraded);
        let states = handler.states.lock().unwrap().clone();
        assert_eq!(states.last(), Some(&ChannelState::Degraded));
        // One initial attempt plus two retries.
        assert_eq!(
            states
                .iter()
                .filter(|s| matches!(s, ChannelState::Connecting | ChannelState::Reconnecting))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn duplicate_and_unknown_frames_are_not_dispatched() {
        let hub = ChannelHub::new();
        let mut session = ChannelSession::new(
            Box::new(hub.connect_local()),
            Identity::new("u1", Role::Staff),
            fast_config(1),
        );
        let (handler, mut events) = recorder();
        let handler: Arc<dyn PushHandler> = handler;

        let frame = InboundFrame {
            id: Some("frame-1".to_string()),
            event: "refresh-notifications".to_string(),
            data: serde_json::Value::Null,
        };
        session.deliver(&handler, frame.clone());
        session.deliver(&handler, frame);
        session.deliver(
            &handler,
            InboundFrame {
                id: Some("frame-2".to_string()),
                event: "budget-approved".to_string(),
                data: serde_json::Value::Null,
            },
        );

        assert_eq!(events.recv().await, Some(PushEvent::RefreshNotifications));
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }
}
