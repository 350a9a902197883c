//! Push channel: typed events, transports, the edge hub and the client
//! session loop.

mod event;
mod hub;
mod session;
mod sse;
mod transport;

pub use event::{
    AttendancePayload, InvitationPayload, ProposalStatusPayload, PushEvent,
    EVENT_ATTENDANCE_RECORDED, EVENT_INVITATION, EVENT_PROPOSAL_STATUS_CHANGED,
    EVENT_REFRESH_NOTIFICATIONS, EVENT_REGISTER_USER, EVENT_UNREGISTER_USER,
    FALLBACK_INVITATION_MESSAGE,
};
pub use hub::{Audience, ChannelHub, ConnectionId, LocalChannel};
pub use session::{ChannelSession, PushHandler};
pub use sse::{SseChannel, SseEvent};
pub use transport::{ChannelError, ChannelState, InboundFrame, OutboundFrame, PushTransport};
