//! Server-Sent Events push transport.
//!
//! Inbound: `GET {url}/events?connectionId=..` streamed as `text/event-stream`.
//! Outbound: `POST {url}/emit` with `{ connectionId, event, data }`. The
//! connection id is generated once per transport and reused across
//! reconnects, so a re-sent `register-user` replaces the server's binding
//! instead of adding one.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, trace};

use super::transport::{ChannelError, ChannelState, InboundFrame, OutboundFrame, PushTransport};
use crate::config::ChannelConfig;

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChannelError>> + Send>>;

// ============================================================================
// SSE Event Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Parse one event block (the text between two blank lines). Returns
    /// `None` for blocks without data, such as keep-alive comments.
    pub fn parse(input: &str) -> Option<Self> {
        let mut event_type = "message".to_string();
        let mut data = String::new();
        let mut id = None;
        let mut retry = None;

        for line in input.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match key {
                "event" => event_type = value.to_string(),
                "data" => {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(value);
                }
                "id" => id = Some(value.to_string()),
                "retry" => retry = value.parse::<u64>().ok(),
                _ => trace!("Unknown SSE field: {}", key),
            }
        }

        if data.is_empty() {
            return None;
        }

        Some(Self {
            event_type,
            data,
            id,
            retry,
        })
    }

    fn into_frame(self) -> InboundFrame {
        let data = serde_json::from_str(&self.data).unwrap_or(Value::String(self.data));
        InboundFrame {
            id: self.id,
            event: self.event_type,
            data,
        }
    }
}

// ============================================================================
// SSE Channel
// ============================================================================

pub struct SseChannel {
    client: reqwest::Client,
    base_url: String,
    connection_id: String,
    state: ChannelState,
    stream: Option<ChunkStream>,
    /// Raw bytes not yet forming a complete event block. Decoded only once a
    /// block is complete, so a character split across chunks survives.
    buffer: Vec<u8>,
    last_event_id: Option<String>,
}

impl SseChannel {
    pub fn new(config: &ChannelConfig, auth_token: Option<&str>) -> Result<Self, ChannelError> {
        if config.url.trim().is_empty() {
            return Err(ChannelError::Config("channel url cannot be empty".to_string()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = auth_token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|e| ChannelError::Config(format!("invalid auth token: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        // No overall timeout: the event stream is long-lived.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ChannelError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            connection_id: uuid::Uuid::new_v4().to_string(),
            state: ChannelState::Disconnected,
            stream: None,
            buffer: Vec::new(),
            last_event_id: None,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Append a received chunk, dropping carriage returns so CRLF streams
    /// split the same way as LF ones.
    fn push_chunk(&mut self, bytes: &[u8]) {
        self.buffer
            .extend(bytes.iter().copied().filter(|byte| *byte != b'\r'));
    }

    /// Pop the next complete event block from the buffer.
    fn next_buffered(&mut self) -> Option<InboundFrame> {
        while let Some(end) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block);
            if let Some(event) = SseEvent::parse(&block) {
                if let Some(id) = &event.id {
                    self.last_event_id = Some(id.clone());
                }
                return Some(event.into_frame());
            }
        }
        None
    }
}

#[async_trait]
impl PushTransport for SseChannel {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.state = ChannelState::Connecting;
        self.stream = None;
        self.buffer.clear();

        let url = format!(
            "{}/events?connectionId={}",
            self.base_url,
            urlencoding::encode(&self.connection_id)
        );
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(last_id) = &self.last_event_id {
            request = request.header("Last-Event-ID", last_id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.state = ChannelState::Disconnected;
                return Err(ChannelError::connection(format!(
                    "failed to connect to event stream: {e}"
                )));
            }
        };

        if !response.status().is_success() {
            self.state = ChannelState::Disconnected;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        info!("Connected to event stream at {}", url);
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| ChannelError::Stream(e.to_string()))
        });
        self.stream = Some(Box::pin(stream));
        self.state = ChannelState::Connected;
        Ok(())
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        if self.state != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }

        let url = format!("{}/emit", self.base_url);
        debug!(event = %frame.event, "emitting frame");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "connectionId": self.connection_id,
                "event": frame.event,
                "data": frame.data,
            }))
            .send()
            .await
            .map_err(ChannelError::connection)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundFrame>, ChannelError> {
        loop {
            if let Some(frame) = self.next_buffered() {
                return Ok(Some(frame));
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(ChannelError::NotConnected);
            };

            match stream.next().await {
                Some(Ok(bytes)) => {
                    trace!("Received SSE chunk of {} bytes", bytes.len());
                    self.push_chunk(&bytes);
                }
                Some(Err(e)) => {
                    self.stream = None;
                    self.state = ChannelState::Disconnected;
                    return Err(e);
                }
                None => {
                    self.stream = None;
                    self.state = ChannelState::Disconnected;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.stream = None;
        self.buffer.clear();
        self.state = ChannelState::Closed;
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.state
    }
}
