use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::channel::ChannelState;
use crate::notification::NotificationId;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Topic {
    /// The store accepted an action; `revision` is the new state revision.
    NotificationsChanged { revision: u64 },
    /// Proposal display data is stale and should be refetched by its owner.
    ProposalsStale { proposal_id: Option<String> },
    /// Participant counts are stale and should be refetched by their owner.
    ParticipantsStale { event_id: Option<String> },
    ChannelStatus { state: ChannelState },
    /// A read mutation was rejected and the local entries were rolled back.
    ReadStateReverted {
        ids: Vec<NotificationId>,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub id: String,
    pub seq: i64,
    #[serde(flatten)]
    pub topic: Topic,
    pub created_at: String,
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    seq: AtomicI64,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Build and publish an event. Having no subscribers is not an error.
    pub fn emit(&self, topic: Topic) -> BusEvent {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            seq,
            topic,
            created_at: Utc::now().to_rfc3339(),
        };
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(seq, "bus event dropped, no subscribers");
        }
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_assigns_increasing_sequence() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Topic::NotificationsChanged { revision: 1 });
        bus.emit(Topic::ProposalsStale { proposal_id: None });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(second.topic, Topic::ProposalsStale { proposal_id: None });
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        let event = bus.emit(Topic::ParticipantsStale {
            event_id: Some("e1".to_string()),
        });
        assert_eq!(event.seq, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn serializes_topic_inline() {
        let bus = EventBus::new();
        let event = bus.emit(Topic::NotificationsChanged { revision: 7 });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "notifications_changed");
        assert_eq!(json["revision"], 7);
    }
}
