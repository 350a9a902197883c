use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Locally generated id for an entry synthesized from a push signal.
    pub fn provisional() -> Self {
        Self(format!("provisional-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Accepts either a bare id string or a populated user document carrying `_id`.
impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(String),
            Populated {
                #[serde(rename = "_id")]
                id: String,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Id(id) | Raw::Populated { id } => UserId(id),
        })
    }
}

// ---------------------------------------------------------------------------
// Roles and identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Staff,
    Participant,
    Other(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Self::Admin,
            "staff" | "organizer" => Self::Staff,
            "participant" | "user" => Self::Participant,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Participant => "participant",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(value))
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The authenticated `(UserId, Role)` pair a push connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Registration,
    Report,
    Reminder,
    Update,
    Invitation,
    #[default]
    #[serde(other)]
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Medium,
    High,
    #[default]
    #[serde(other)]
    Low,
}

/// Per-user read-state record attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user: UserId,
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
}

/// Whether an entry came from the server or was synthesized locally from a
/// push signal. Never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Authoritative,
    Provisional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub viewers: Vec<Viewer>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Notification {
    pub fn new(id: NotificationId, message: impl Into<String>, category: Category) -> Self {
        Self {
            id,
            message: message.into(),
            title: None,
            category,
            priority: Priority::default(),
            created_at: Utc::now(),
            archived: false,
            viewers: Vec::new(),
            origin: Origin::Authoritative,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.origin == Origin::Provisional
    }

    pub fn viewer(&self, user: &UserId) -> Option<&Viewer> {
        self.viewers.iter().find(|viewer| &viewer.user == user)
    }

    /// Upsert the viewer entry for `user`, leaving every other entry untouched.
    /// Returns the entry that was replaced, if any.
    pub fn set_read(&mut self, user: &UserId, is_read: bool) -> Option<Viewer> {
        if let Some(viewer) = self.viewers.iter_mut().find(|viewer| &viewer.user == user) {
            let previous = viewer.clone();
            viewer.is_read = is_read;
            return Some(previous);
        }
        self.viewers.push(Viewer {
            user: user.clone(),
            is_read,
        });
        None
    }

    /// Put back a viewer entry captured before a local mutation. `None` means
    /// the user had no entry at all.
    pub fn restore_viewer(&mut self, user: &UserId, previous: Option<Viewer>) {
        self.viewers.retain(|viewer| &viewer.user != user);
        if let Some(previous) = previous {
            self.viewers.push(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_server_document() {
        let raw = json!({
            "_id": "n1",
            "message": "Proposal approved",
            "title": "Update",
            "type": "update",
            "priority": "high",
            "createdAt": "2024-03-01T10:00:00Z",
            "archived": false,
            "viewers": [
                { "user": "u1", "isRead": true },
                { "user": { "_id": "u2", "name": "Ana" }, "isRead": false }
            ]
        });

        let notification: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(notification.id.as_str(), "n1");
        assert_eq!(notification.category, Category::Update);
        assert_eq!(notification.priority, Priority::High);
        assert_eq!(notification.viewers[1].user, UserId::from("u2"));
        assert_eq!(notification.origin, Origin::Authoritative);
    }

    #[test]
    fn unknown_category_and_priority_fall_back() {
        let raw = json!({
            "_id": "n2",
            "type": "broadcast",
            "priority": "urgent",
            "createdAt": "2024-03-01T10:00:00Z"
        });

        let notification: Notification = serde_json::from_value(raw).unwrap();
        assert_eq!(notification.category, Category::Generic);
        assert_eq!(notification.priority, Priority::Low);
        assert!(notification.viewers.is_empty());
        assert!(!notification.archived);
    }

    #[test]
    fn priority_names_are_lowercase_with_low_default() {
        assert_eq!(Priority::default(), Priority::Low);
        assert_eq!(serde_json::to_value(Priority::Medium).unwrap(), json!("medium"));
        assert_eq!(serde_json::to_value(Priority::Low).unwrap(), json!("low"));
        let high: Priority = serde_json::from_value(json!("high")).unwrap();
        assert_eq!(high, Priority::High);
    }

    #[test]
    fn set_read_upserts_single_entry_per_user() {
        let mut notification = Notification::new("n1".into(), "hello", Category::Generic);
        let u1 = UserId::from("u1");
        let u2 = UserId::from("u2");

        assert_eq!(notification.set_read(&u2, false), None);
        assert_eq!(notification.set_read(&u1, true), None);
        let previous = notification.set_read(&u1, true);

        assert_eq!(previous, Some(Viewer { user: u1.clone(), is_read: true }));
        assert_eq!(notification.viewers.len(), 2);
        assert_eq!(notification.viewer(&u2).map(|v| v.is_read), Some(false));
    }

    #[test]
    fn restore_viewer_removes_entry_that_did_not_exist() {
        let mut notification = Notification::new("n1".into(), "hello", Category::Generic);
        let user = UserId::from("u1");
        let previous = notification.set_read(&user, true);
        notification.restore_viewer(&user, previous);
        assert!(notification.viewer(&user).is_none());
    }

    #[test]
    fn role_parsing_is_lenient() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("organizer".parse::<Role>().unwrap(), Role::Staff);
        assert_eq!(
            "auditor".parse::<Role>().unwrap(),
            Role::Other("auditor".to_string())
        );
    }
}
