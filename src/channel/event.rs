//! Typed push events, decoded once at the channel boundary.
//!
//! Decoding never fails: unknown event names become `PushEvent::Unknown` and
//! missing or mistyped payload fields fall back to defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::notification::{
    Category, Notification, NotificationId, Origin, Priority, UserId, Viewer,
};

pub const EVENT_REGISTER_USER: &str = "register-user";
pub const EVENT_UNREGISTER_USER: &str = "unregister-user";
pub const EVENT_INVITATION: &str = "invitation";
pub const EVENT_PROPOSAL_STATUS_CHANGED: &str = "proposal-status-changed";
pub const EVENT_REFRESH_NOTIFICATIONS: &str = "refresh-notifications";
pub const EVENT_ATTENDANCE_RECORDED: &str = "attendance-recorded";

pub const FALLBACK_INVITATION_MESSAGE: &str = "You have received a new invitation.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl InvitationPayload {
    fn from_value(data: &Value) -> Self {
        Self {
            id: str_field(data, &["_id", "id"]),
            message: str_field(data, &["message"]),
            title: str_field(data, &["title"]),
            category: typed_field(data, "type"),
            priority: typed_field(data, "priority"),
            created_at: typed_field(data, "createdAt"),
        }
    }

    /// Message to show, falling back when the payload had none.
    pub fn message_or_default(&self) -> &str {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(FALLBACK_INVITATION_MESSAGE)
    }

    /// Build the provisional entry shown until the next authoritative fetch.
    /// The id is always generated locally, never taken from the payload.
    pub fn to_provisional(&self, user: &UserId) -> Notification {
        Notification {
            id: NotificationId::provisional(),
            message: self.message_or_default().to_string(),
            title: self.title.clone(),
            category: self.category.unwrap_or(Category::Invitation),
            priority: self.priority.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            archived: false,
            viewers: vec![Viewer {
                user: user.clone(),
                is_read: false,
            }],
            origin: Origin::Provisional,
        }
    }
}

impl From<&Notification> for InvitationPayload {
    fn from(notification: &Notification) -> Self {
        Self {
            id: Some(notification.id.to_string()),
            message: Some(notification.message.clone()),
            title: notification.title.clone(),
            category: Some(notification.category),
            priority: Some(notification.priority),
            created_at: Some(notification.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalStatusPayload {
    pub proposal_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendancePayload {
    pub event_id: Option<String>,
    pub participant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Invitation(InvitationPayload),
    ProposalStatusChanged(ProposalStatusPayload),
    RefreshNotifications,
    AttendanceRecorded(AttendancePayload),
    Unknown { name: String },
}

impl PushEvent {
    pub fn decode(name: &str, data: &Value) -> Self {
        match name {
            EVENT_INVITATION => Self::Invitation(InvitationPayload::from_value(data)),
            EVENT_PROPOSAL_STATUS_CHANGED => {
                let inner = data.get("data").unwrap_or(data);
                Self::ProposalStatusChanged(ProposalStatusPayload {
                    proposal_id: str_field(inner, &["_id", "id"]),
                    status: str_field(inner, &["status"]),
                })
            }
            EVENT_REFRESH_NOTIFICATIONS => Self::RefreshNotifications,
            EVENT_ATTENDANCE_RECORDED => Self::AttendanceRecorded(AttendancePayload {
                event_id: str_field(data, &["eventId", "event"]),
                participant_id: str_field(data, &["participantId", "participant", "user"]),
            }),
            other => Self::Unknown {
                name: other.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Invitation(_) => EVENT_INVITATION,
            Self::ProposalStatusChanged(_) => EVENT_PROPOSAL_STATUS_CHANGED,
            Self::RefreshNotifications => EVENT_REFRESH_NOTIFICATIONS,
            Self::AttendanceRecorded(_) => EVENT_ATTENDANCE_RECORDED,
            Self::Unknown { name } => name,
        }
    }

    /// Wire payload, as an edge producer would emit it.
    pub fn payload(&self) -> Value {
        match self {
            Self::Invitation(payload) => serde_json::to_value(payload).unwrap_or(Value::Null),
            Self::ProposalStatusChanged(payload) => json!({
                "data": { "_id": payload.proposal_id, "status": payload.status }
            }),
            Self::RefreshNotifications | Self::Unknown { .. } => Value::Null,
            Self::AttendanceRecorded(payload) => json!({
                "eventId": payload.event_id,
                "participantId": payload.participant_id,
            }),
        }
    }
}

/// First non-blank string among `keys`. Populated references (`{ "_id": .. }`)
/// are unwrapped.
fn str_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let value = data.get(key)?;
        let raw = match value {
            Value::String(s) => s.as_str(),
            Value::Object(_) => value.get("_id")?.as_str()?,
            _ => return None,
        };
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn typed_field<T: serde::de::DeserializeOwned>(data: &Value, key: &str) -> Option<T> {
    data.get(key)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}
