//! Session over the HTTP pull API and the SSE push channel against a mock
//! server.

mod common;

use std::sync::Arc;

use civic_notify::backoff::Backoff;
use civic_notify::config::{ApiConfig, ChannelConfig};
use civic_notify::{Identity, NotificationSession, Role, SyncConfig};
use common::wait_for;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use pretty_assertions::assert_eq;
use serde_json::json;

fn config_for(server: &MockServer) -> SyncConfig {
    let backoff = Backoff {
        base_delay_ms: 20,
        max_delay_ms: 50,
        jitter: false,
    };
    SyncConfig {
        api: ApiConfig {
            base_url: server.base_url(),
            retry_count: 0,
            retry: backoff,
            ..ApiConfig::default()
        },
        channel: ChannelConfig {
            url: server.base_url(),
            max_reconnect_attempts: 3,
            reconnect: backoff,
            ..ChannelConfig::default()
        },
        poll_interval_secs: 1,
    }
}

#[tokio::test]
async fn session_registers_and_reconciles_pushed_invitation() {
    let server = MockServer::start();
    let fetch = server.mock(|when, then| {
        when.method(GET)
            .path("/notifications")
            .query_param("byUser", "u1");
        then.status(200).json_body(json!({
            "data": [{
                "_id": "n1",
                "message": "Budget hearing on Friday",
                "type": "invitation",
                "createdAt": "2024-05-01T08:00:00Z",
                "viewers": [{ "user": { "_id": "u1" }, "isRead": false }]
            }],
            "unreadCount": 1
        }));
    });
    let events = server.mock(|when, then| {
        when.method(GET)
            .path("/events")
            .header("accept", "text/event-stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body("event: invitation\nid: evt-1\ndata: {\"message\":\"Budget hearing on Friday\"}\n\n");
    });
    let register = server.mock(|when, then| {
        when.method(POST)
            .path("/emit")
            .body_contains("\"event\":\"register-user\"")
            .body_contains("\"userId\":\"u1\"");
        then.status(200);
    });

    let session = NotificationSession::connect(
        &config_for(&server),
        Some(Identity::new("u1", Role::Participant)),
    )
    .await
    .expect("session should start");
    assert_eq!(session.store().get_state().unread_count, 1);

    // Initial fetch plus at least the refetch triggered by the invitation.
    wait_for("refetch after invitation", || fetch.hits() >= 2).await;
    assert!(events.hits() >= 1);
    assert!(register.hits() >= 1);

    let store = Arc::clone(session.store());
    wait_for("provisional entry replaced", move || {
        store.read(|s| s.provisional_count() == 0 && s.notifications.len() == 1)
    })
    .await;
    let state = session.store().get_state();
    assert_eq!(state.notifications[0].id.as_str(), "n1");
    assert_eq!(state.unread_count, 1);

    session.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let config = SyncConfig {
        poll_interval_secs: 0,
        ..SyncConfig::default()
    };
    let result = NotificationSession::connect(&config, Some(Identity::new("u1", Role::Staff))).await;
    assert!(matches!(result, Err(civic_notify::NotifyError::Config(_))));
}
