//! Push transport abstraction.
//!
//! A transport carries raw frames only. Decoding into `PushEvent`,
//! registration and reconnect policy live in `ChannelSession`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::event::{EVENT_REGISTER_USER, EVENT_UNREGISTER_USER};
use crate::notification::Identity;

// ============================================================================
// Channel State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnects were given up on; the session continues pull-only.
    Degraded,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Reconnecting => write!(f, "reconnecting"),
            ChannelState::Degraded => write!(f, "degraded"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("channel closed")]
    Closed,
    #[error("config error: {0}")]
    Config(String),
}

impl ChannelError {
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        ChannelError::Connection(err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Connection(_) | ChannelError::Stream(_) | ChannelError::NotConnected => {
                true
            }
            ChannelError::Http { status, .. } => *status >= 500 || *status == 429,
            ChannelError::Closed | ChannelError::Config(_) => false,
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A raw server-to-client signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Identifies one logical event; repeated deliveries carry the same id.
    #[serde(default)]
    pub id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A raw client-to-server signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl OutboundFrame {
    pub fn register(identity: &Identity) -> Self {
        Self {
            event: EVENT_REGISTER_USER.to_string(),
            data: json!({ "userId": identity.user_id, "role": identity.role }),
        }
    }

    pub fn unregister(identity: &Identity) -> Self {
        Self {
            event: EVENT_UNREGISTER_USER.to_string(),
            data: json!({ "userId": identity.user_id }),
        }
    }

    /// Identity carried by a `register-user` frame.
    pub fn identity(&self) -> Option<Identity> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

#[async_trait]
pub trait PushTransport: Send {
    /// Open (or re-open) the connection. Calling this on a connected transport
    /// replaces the previous connection.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ChannelError>;

    /// Next inbound frame. `Ok(None)` means the remote end closed the stream.
    async fn recv(&mut self) -> Result<Option<InboundFrame>, ChannelError>;

    async fn close(&mut self) -> Result<(), ChannelError>;

    fn state(&self) -> ChannelState;
}
