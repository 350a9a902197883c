use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use civic_notify::api::Recipients;
use civic_notify::channel::ChannelHub;
use civic_notify::notification::Category;
use civic_notify::{
    EventProducer, Identity, InMemoryNotificationBackend, Notification, NotificationId,
    NotificationSession, NotificationStore, Role, SyncConfig, Topic, UserId,
};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "civic_notify=debug,info".into()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("notify_watch failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut user: Option<String> = None;
    let mut role = Role::Participant;
    let mut config_path: Option<PathBuf> = None;
    let mut show_all = false;
    let mut offline = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        if let Some(value) = arg.strip_prefix("--user=") {
            user = Some(value.to_string());
            continue;
        }
        if arg == "--user" {
            let value = args
                .next()
                .ok_or_else(|| "--user requires a value".to_string())?;
            user = Some(value);
            continue;
        }

        if let Some(value) = arg.strip_prefix("--role=") {
            role = Role::parse(value);
            continue;
        }
        if arg == "--role" {
            let value = args
                .next()
                .ok_or_else(|| "--role requires a value".to_string())?;
            role = Role::parse(&value);
            continue;
        }

        if let Some(value) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config requires a value".to_string())?;
            config_path = Some(PathBuf::from(value));
            continue;
        }

        match arg.as_str() {
            "--all" => show_all = true,
            "--offline" => offline = true,
            _ => return Err(format!("unknown argument '{arg}'. Use --help for usage")),
        }
    }

    let config = SyncConfig::load(config_path.as_deref()).map_err(|e| e.to_string())?;
    let identity = user
        .filter(|value| !value.trim().is_empty())
        .map(|value| Identity::new(value.trim(), role));

    let mut producer = None;
    let session = if offline {
        let backend = Arc::new(InMemoryNotificationBackend::new());
        let hub = ChannelHub::new();
        if let Some(identity) = &identity {
            seed(&backend, &identity.user_id).await;
        }
        let transport = hub.connect_local();
        producer = Some(Arc::new(EventProducer::new(Arc::clone(&backend), hub)));
        NotificationSession::start(
            &config,
            identity.clone(),
            backend,
            Box::new(transport),
            Arc::new(NotificationStore::new()),
        )
        .await
    } else {
        NotificationSession::connect(&config, identity.clone())
            .await
            .map_err(|e| e.to_string())?
    };

    let Some(engine) = session.engine().cloned() else {
        println!("no --user given; nothing to watch");
        session.shutdown().await;
        return Ok(());
    };
    if show_all {
        engine
            .set_show_all(true)
            .await
            .map_err(|e| format!("full-history fetch failed: {e}"))?;
    }

    if let (Some(producer), Some(identity)) = (producer, &identity) {
        let invitee = identity.user_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer
                .invite(
                    &invitee,
                    Some("Invitation".to_string()),
                    "Join the community cleanup drive",
                )
                .await;
        });
    }

    let mut rx = session.store().subscribe();
    let store = Arc::clone(session.store());
    let user = engine.user().clone();
    let revision = store.read(|state| state.revision);
    report(&Topic::NotificationsChanged { revision }, &store, &user);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => match received {
                Ok(event) => report(&event.topic, &store, &user),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("watcher lagged, dropped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

fn report(topic: &Topic, store: &NotificationStore, user: &UserId) {
    match topic {
        Topic::NotificationsChanged { revision } => {
            let (total, provisional, summary) = store.read(|state| {
                (
                    state.notifications.len(),
                    state.provisional_count(),
                    state.unread_summary(user),
                )
            });
            println!(
                "[rev {revision}] {total} notifications ({provisional} provisional), unread {} reported / {} visible",
                summary.reported, summary.visible
            );
        }
        Topic::ChannelStatus { state } => println!("channel {state}"),
        Topic::ReadStateReverted { ids, reason } => {
            println!("read marks reverted for {} notifications: {reason}", ids.len());
        }
        Topic::ProposalsStale { proposal_id } => {
            println!("proposal data stale ({})", proposal_id.as_deref().unwrap_or("all"));
        }
        Topic::ParticipantsStale { event_id } => {
            println!("participant counts stale ({})", event_id.as_deref().unwrap_or("all"));
        }
    }
}

async fn seed(backend: &InMemoryNotificationBackend, user: &UserId) {
    let entries = [
        ("welcome", "Welcome to the civic portal.", Category::Generic, false),
        ("reminder", "Town hall starts tomorrow at 18:00.", Category::Reminder, false),
        ("report", "Your report was received.", Category::Report, true),
    ];
    for (id, message, category, read) in entries {
        let mut notification = Notification::new(NotificationId::new(id), message, category);
        if read {
            notification.set_read(user, true);
        }
        backend.insert(notification, Recipients::Everyone).await;
    }
}

fn print_help() {
    println!(
        "notify_watch

Opens a notification session and prints reconciled state as it changes.

Usage:
  notify_watch --user <id> [--role <role>] [--config <file>] [--all] [--offline]

Options:
  --user <id>        Authenticated user id. Without it the session stays idle.
  --role <role>      admin, staff or participant (default: participant).
  --config <file>    JSON config file. CIVIC_NOTIFY_* variables and .env override it.
  --all              Fetch full history instead of the recent scope.
  --offline          Use an in-process store and channel with sample data.
  -h, --help         Show this help."
    );
}
