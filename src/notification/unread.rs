use serde::Serialize;

use super::{Notification, UserId};

/// A notification is unread for `user` when it is not archived and the user
/// has no viewer entry, or has one with `isRead = false`.
pub fn is_unread(notification: &Notification, user: &UserId) -> bool {
    !notification.archived
        && notification
            .viewer(user)
            .map_or(true, |viewer| !viewer.is_read)
}

/// Count of notifications in `list` that are unread for `user`.
pub fn visible_unread_count<'a, I>(list: I, user: &UserId) -> usize
where
    I: IntoIterator<Item = &'a Notification>,
{
    list.into_iter()
        .filter(|notification| is_unread(notification, user))
        .count()
}

/// The unread count the server reported with the last fetch, next to the one
/// derived locally from the materialized list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnreadSummary {
    pub reported: usize,
    pub visible: usize,
}

impl UnreadSummary {
    pub fn agrees(&self) -> bool {
        self.reported == self.visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{Category, Viewer};

    fn notification(id: &str, archived: bool, viewers: Vec<Viewer>) -> Notification {
        let mut n = Notification::new(id.into(), "msg", Category::Generic);
        n.archived = archived;
        n.viewers = viewers;
        n
    }

    fn viewer(user: &str, is_read: bool) -> Viewer {
        Viewer {
            user: user.into(),
            is_read,
        }
    }

    #[test]
    fn missing_viewer_entry_counts_as_unread() {
        let n = notification("n1", false, vec![viewer("other", true)]);
        assert!(is_unread(&n, &"me".into()));
        assert!(!is_unread(&n, &"other".into()));
    }

    #[test]
    fn explicit_unread_entry_counts_as_unread() {
        let n = notification("n1", false, vec![viewer("me", false)]);
        assert!(is_unread(&n, &"me".into()));
    }

    #[test]
    fn archived_is_never_unread() {
        let n = notification("n1", true, vec![]);
        assert!(!is_unread(&n, &"me".into()));
    }

    #[test]
    fn visible_count_over_mixed_list() {
        let me = UserId::from("me");
        let list = vec![
            notification("a", false, vec![]),
            notification("b", false, vec![viewer("me", true)]),
            notification("c", false, vec![viewer("me", false), viewer("you", true)]),
            notification("d", true, vec![]),
        ];
        assert_eq!(visible_unread_count(&list, &me), 2);
        assert_eq!(visible_unread_count(&list, &"you".into()), 2);
    }

    #[test]
    fn summary_agreement() {
        assert!(UnreadSummary { reported: 2, visible: 2 }.agrees());
        assert!(!UnreadSummary { reported: 3, visible: 2 }.agrees());
    }
}
