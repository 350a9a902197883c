//! Notification data model and unread derivation.
//!
//! A notification carries a per-user viewer list. Read state is never stored
//! as a counter: "unread for user U" is always derived from the viewer entry
//! for U (or its absence) and the archived flag.

mod model;
mod unread;

pub use model::{
    Category, Identity, Notification, NotificationId, Origin, Priority, Role, UserId, Viewer,
};
pub use unread::{is_unread, visible_unread_count, UnreadSummary};
