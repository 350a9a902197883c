//! Edge-side channel hub.
//!
//! Thread-safe registry of open push connections and the identity each one
//! registered. Producers publish to audiences; the hub resolves audiences to
//! connections and delivers at most one copy of an event per connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::event::{PushEvent, EVENT_REGISTER_USER, EVENT_UNREGISTER_USER};
use super::transport::{ChannelError, ChannelState, InboundFrame, OutboundFrame, PushTransport};
use crate::notification::{Identity, Role, UserId};

pub type ConnectionId = String;

/// Who a published event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    User(UserId),
    Role(Role),
    Everyone,
}

impl Audience {
    fn matches(&self, identity: &Identity) -> bool {
        match self {
            Audience::User(user) => &identity.user_id == user,
            Audience::Role(role) => &identity.role == role,
            Audience::Everyone => true,
        }
    }
}

struct Connection {
    /// Set by `register-user`; unregistered connections receive nothing.
    identity: Option<Identity>,
    tx: mpsc::UnboundedSender<InboundFrame>,
}

#[derive(Clone)]
pub struct ChannelHub {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    next_connection: Arc<AtomicU64>,
    next_frame: Arc<AtomicU64>,
    accepting: Arc<AtomicBool>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_connection: Arc::new(AtomicU64::new(1)),
            next_frame: Arc::new(AtomicU64::new(1)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open a new, unregistered connection.
    pub fn open(
        &self,
    ) -> Result<(ConnectionId, mpsc::UnboundedReceiver<InboundFrame>), ChannelError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ChannelError::connection("hub is not accepting connections"));
        }
        let id = format!(
            "conn-{}",
            self.next_connection.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id.clone(), Connection { identity: None, tx });
        debug!(connection = %id, "connection opened");
        Ok((id, rx))
    }

    /// Bind `connection` to `identity`. Re-registering replaces the previous
    /// binding, so repeated registrations never add deliveries.
    pub fn register(&self, connection: &str, identity: Identity) -> Result<(), ChannelError> {
        let mut entry = self
            .connections
            .get_mut(connection)
            .ok_or(ChannelError::NotConnected)?;
        debug!(connection, user = %identity.user_id, role = %identity.role, "user registered");
        entry.identity = Some(identity);
        Ok(())
    }

    pub fn unregister(&self, connection: &str) {
        if let Some(mut entry) = self.connections.get_mut(connection) {
            entry.identity = None;
        }
    }

    pub fn disconnect(&self, connection: &str) {
        if self.connections.remove(connection).is_some() {
            debug!(connection, "connection closed");
        }
    }

    /// Apply a client-to-server frame received on `connection`.
    pub fn handle_frame(&self, connection: &str, frame: OutboundFrame) -> Result<(), ChannelError> {
        if !self.connections.contains_key(connection) {
            return Err(ChannelError::NotConnected);
        }
        match frame.event.as_str() {
            EVENT_REGISTER_USER => match frame.identity() {
                Some(identity) => self.register(connection, identity),
                None => {
                    warn!(connection, "register-user frame without a usable identity");
                    Ok(())
                }
            },
            EVENT_UNREGISTER_USER => {
                self.unregister(connection);
                Ok(())
            }
            other => {
                trace!(connection, event = other, "ignoring client frame");
                Ok(())
            }
        }
    }

    /// Deliver `event` to every registered connection matching any of
    /// `audiences`. Returns the number of connections reached.
    pub fn publish(&self, audiences: &[Audience], event: &PushEvent) -> usize {
        let frame = InboundFrame {
            id: Some(format!(
                "frame-{}",
                self.next_frame.fetch_add(1, Ordering::Relaxed)
            )),
            event: event.name().to_string(),
            data: event.payload(),
        };

        let mut stale = Vec::new();
        let mut delivered = 0;
        for entry in self.connections.iter() {
            let Some(identity) = &entry.value().identity else {
                continue;
            };
            if !audiences.iter().any(|audience| audience.matches(identity)) {
                continue;
            }
            if entry.value().tx.send(frame.clone()).is_err() {
                stale.push(entry.key().clone());
                continue;
            }
            delivered += 1;
        }

        for connection in stale {
            self.connections.remove(&connection);
        }

        debug!(event = %frame.event, delivered, "event published");
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections currently registered for `user`.
    pub fn registered_count(&self, user: &UserId) -> usize {
        self.connections
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .identity
                    .as_ref()
                    .is_some_and(|identity| &identity.user_id == user)
            })
            .count()
    }

    /// Refuse new connections and, when turning off, drop every open one.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
        if !accepting {
            self.connections.clear();
        }
    }

    /// A transport bound to this hub, for in-process clients.
    pub fn connect_local(&self) -> LocalChannel {
        LocalChannel {
            hub: self.clone(),
            connection: None,
            state: ChannelState::Disconnected,
        }
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process [`PushTransport`] backed by a [`ChannelHub`].
pub struct LocalChannel {
    hub: ChannelHub,
    connection: Option<(ConnectionId, mpsc::UnboundedReceiver<InboundFrame>)>,
    state: ChannelState,
}

impl LocalChannel {
    pub fn connection_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|(id, _)| id.as_str())
    }

    fn release(&mut self) {
        if let Some((id, _)) = self.connection.take() {
            self.hub.disconnect(&id);
        }
    }
}

#[async_trait]
impl PushTransport for LocalChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.release();
        self.state = ChannelState::Connecting;
        match self.hub.open() {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = ChannelState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Disconnected;
                Err(e)
            }
        }
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        let Some((id, _)) = &self.connection else {
            return Err(ChannelError::NotConnected);
        };
        self.hub.handle_frame(id, frame)
    }

    async fn recv(&mut self) -> Result<Option<InboundFrame>, ChannelError> {
        let Some((_, rx)) = self.connection.as_mut() else {
            return Err(ChannelError::NotConnected);
        };
        match rx.recv().await {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.connection = None;
                self.state = ChannelState::Disconnected;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.release();
        self.state = ChannelState::Closed;
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.state
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.release();
    }
}
