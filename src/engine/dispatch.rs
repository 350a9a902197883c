use crate::channel::PushEvent;
use crate::notification::{Notification, UserId};

/// Data that has to be pulled again after a push signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefetchTarget {
    Notifications,
    Proposals { proposal_id: Option<String> },
    Participants { event_id: Option<String> },
}

/// What one push event asks the engine to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    pub provisional: Option<Notification>,
    pub refetch: Vec<RefetchTarget>,
}

impl DispatchPlan {
    pub fn is_empty(&self) -> bool {
        self.provisional.is_none() && self.refetch.is_empty()
    }
}

/// Map `event` to its side effects for `user`. Only invitations synthesize a
/// provisional entry; everything else is refetched.
pub fn plan(event: &PushEvent, user: &UserId) -> DispatchPlan {
    match event {
        PushEvent::Invitation(payload) => DispatchPlan {
            provisional: Some(payload.to_provisional(user)),
            refetch: vec![RefetchTarget::Notifications],
        },
        PushEvent::ProposalStatusChanged(payload) => DispatchPlan {
            provisional: None,
            refetch: vec![
                RefetchTarget::Notifications,
                RefetchTarget::Proposals {
                    proposal_id: payload.proposal_id.clone(),
                },
            ],
        },
        PushEvent::RefreshNotifications => DispatchPlan {
            provisional: None,
            refetch: vec![RefetchTarget::Notifications],
        },
        PushEvent::AttendanceRecorded(payload) => DispatchPlan {
            provisional: None,
            refetch: vec![RefetchTarget::Participants {
                event_id: payload.event_id.clone(),
            }],
        },
        PushEvent::Unknown { .. } => DispatchPlan::default(),
    }
}
