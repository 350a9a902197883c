//! Edge-side event producers.
//!
//! Each operation writes the durable notification (when there is one) before
//! pushing the signal, so the refetch a client runs on receipt already sees
//! the new entry.

use std::sync::Arc;

use tracing::info;

use crate::api::{InMemoryNotificationBackend, Recipients};
use crate::channel::{
    Audience, AttendancePayload, ChannelHub, InvitationPayload, ProposalStatusPayload, PushEvent,
};
use crate::notification::{Category, Notification, NotificationId, Priority, Role, UserId};

pub struct EventProducer {
    backend: Arc<InMemoryNotificationBackend>,
    hub: ChannelHub,
}

impl EventProducer {
    pub fn new(backend: Arc<InMemoryNotificationBackend>, hub: ChannelHub) -> Self {
        Self { backend, hub }
    }

    pub fn backend(&self) -> &Arc<InMemoryNotificationBackend> {
        &self.backend
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    /// Invite `invitee`: store the invitation, then push it to the invitee's
    /// connections. Returns the stored notification.
    pub async fn invite(
        &self,
        invitee: &UserId,
        title: Option<String>,
        message: impl Into<String>,
    ) -> Notification {
        let mut notification = Notification::new(
            NotificationId::new(uuid::Uuid::new_v4().to_string()),
            message,
            Category::Invitation,
        );
        notification.title = title;
        notification.priority = Priority::Medium;

        self.backend
            .insert(notification.clone(), Recipients::user(invitee.clone()))
            .await;
        let delivered = self.hub.publish(
            &[Audience::User(invitee.clone())],
            &PushEvent::Invitation(InvitationPayload::from(&notification)),
        );
        info!(invitee = %invitee, id = %notification.id, delivered, "invitation sent");
        notification
    }

    /// Record a proposal status change for its owner and tell the owner and
    /// every admin to refetch.
    pub async fn proposal_status_changed(
        &self,
        owner: &UserId,
        proposal_id: &str,
        status: &str,
    ) -> Notification {
        let mut notification = Notification::new(
            NotificationId::new(uuid::Uuid::new_v4().to_string()),
            format!("Your proposal status changed to {status}."),
            Category::Update,
        );
        notification.title = Some("Proposal update".to_string());

        self.backend
            .insert(notification.clone(), Recipients::user(owner.clone()))
            .await;
        let delivered = self.hub.publish(
            &[Audience::User(owner.clone()), Audience::Role(Role::Admin)],
            &PushEvent::ProposalStatusChanged(ProposalStatusPayload {
                proposal_id: Some(proposal_id.to_string()),
                status: Some(status.to_string()),
            }),
        );
        info!(owner = %owner, proposal_id, status, delivered, "proposal status pushed");
        notification
    }

    /// A scan changed participant counts. No notification is stored.
    pub fn attendance_recorded(&self, event_id: &str, participant: &UserId) -> usize {
        self.hub.publish(
            &[Audience::Role(Role::Staff), Audience::Role(Role::Admin)],
            &PushEvent::AttendanceRecorded(AttendancePayload {
                event_id: Some(event_id.to_string()),
                participant_id: Some(participant.to_string()),
            }),
        )
    }

    /// Ask `audiences` to refetch unconditionally.
    pub fn refresh(&self, audiences: &[Audience]) -> usize {
        self.hub.publish(audiences, &PushEvent::RefreshNotifications)
    }
}
