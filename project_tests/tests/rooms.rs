use std::time::Duration;

use serde_json::json;

use lib_shopfloor::rooms::{ConnectionOptions, ConnectionStatus, ReconnectPolicy, Room, RoomClient};
use lib_shopfloor::TransportError;
use project_tests::MockBackend;

const WAIT: Duration = Duration::from_secs(5);

fn options() -> ConnectionOptions {
    ConnectionOptions {
        join_timeout: Duration::from_millis(500),
        ..ConnectionOptions::default()
    }
}

async fn wait_status(
    handle: &lib_shopfloor::ConnectionHandle,
    mut pred: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut rx = handle.watch_status();
    let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .map(|r| r.map(|s| s.clone()));
    match reached {
        Ok(Ok(status)) => status,
        other => panic!("status not reached: {:?} (now {:?})", other.is_ok(), handle.status()),
    }
}

#[tokio::test]
async fn joins_receives_events_and_leaves_on_close() {
    let backend = MockBackend::start().await.unwrap();
    let client = RoomClient::new(&backend.ws_url(), options()).unwrap();
    let handle = client.open(Room::machines());
    let mut pallets = handle.subscribe(&["detail:event"]);
    let mut orders = handle.subscribe(&["order:event"]);

    wait_status(&handle, ConnectionStatus::is_connected).await;
    assert_eq!(backend.joins(), vec!["room:machines".to_string()]);

    backend.emit("room:machines", "detail:event", json!({"status": "updated"}));
    backend.emit("room:packaging", "detail:event", json!({"status": "created"}));

    let got = tokio::time::timeout(WAIT, pallets.recv()).await.unwrap().unwrap();
    assert_eq!(got.event, "detail:event");
    assert_eq!(got.status(), Some("updated"));
    assert_eq!(got.room.as_deref(), Some("room:machines"));
    assert!(orders.try_recv().is_none());

    handle.close().await;
    assert_eq!(handle.status(), ConnectionStatus::Closed);
    assert!(backend.wait_for_leaves(1, WAIT).await);
    assert_eq!(backend.leaves(), vec!["room:machines".to_string()]);

    // Nothing after close, even if the server still sends
    backend.emit("room:machines", "detail:event", json!({"status": "updated"}));
    assert!(pallets.recv().await.is_none());
}

#[tokio::test]
async fn rejected_join_is_reported_and_not_retried() {
    let backend = MockBackend::start().await.unwrap();
    backend.reject_room("room:secret", "forbidden");
    let client = RoomClient::new(
        &backend.ws_url(),
        ConnectionOptions {
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(50)),
            ..options()
        },
    )
    .unwrap();
    let handle = client.open(Room::new("room:secret"));

    let status = wait_status(&handle, |s| s.error().is_some()).await;
    assert_eq!(
        status,
        ConnectionStatus::Error(TransportError::JoinRejected {
            room: "room:secret".into(),
            reason: "forbidden".into(),
        })
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.joins().len(), 1);
    handle.close().await;
}

#[tokio::test]
async fn unanswered_join_times_out() {
    let backend = MockBackend::start().await.unwrap();
    backend.ignore_joins("room:machines");
    let client = RoomClient::new(&backend.ws_url(), options()).unwrap();
    let handle = client.open(Room::machines());

    let status = wait_status(&handle, |s| s.error().is_some()).await;
    assert!(matches!(status, ConnectionStatus::Error(TransportError::JoinTimeout { .. })));
    handle.close().await;
}

#[tokio::test]
async fn events_tagged_for_another_room_are_delivered_unless_strict() {
    let backend = MockBackend::start().await.unwrap();

    let lenient = RoomClient::new(&backend.ws_url(), options()).unwrap().open(Room::machines());
    let strict = RoomClient::new(
        &backend.ws_url(),
        ConnectionOptions {
            strict_room_filter: true,
            ..options()
        },
    )
    .unwrap()
    .open(Room::machines());

    let mut lenient_sub = lenient.subscribe(&["detail:event"]);
    let mut strict_sub = strict.subscribe(&["detail:event"]);
    wait_status(&lenient, ConnectionStatus::is_connected).await;
    wait_status(&strict, ConnectionStatus::is_connected).await;

    backend.emit_tagged("room:machines", Some("room:masterceh"), "detail:event", json!({"status": "updated"}));
    backend.emit_tagged("room:machines", None, "detail:event", json!({"status": "created"}));

    let first = tokio::time::timeout(WAIT, lenient_sub.recv()).await.unwrap().unwrap();
    assert_eq!(first.room.as_deref(), Some("room:masterceh"));
    let second = tokio::time::timeout(WAIT, lenient_sub.recv()).await.unwrap().unwrap();
    assert_eq!(second.status(), Some("created"));

    // The strict handle only sees the untagged one
    let only = tokio::time::timeout(WAIT, strict_sub.recv()).await.unwrap().unwrap();
    assert_eq!(only.status(), Some("created"));
    assert!(strict_sub.try_recv().is_none());

    lenient.close().await;
    strict.close().await;
}

#[tokio::test]
async fn server_drop_is_an_error_and_fixed_policy_rejoins() {
    let backend = MockBackend::start().await.unwrap();

    let stays_down = RoomClient::new(&backend.ws_url(), options()).unwrap().open(Room::packaging());
    let rejoins = RoomClient::new(
        &backend.ws_url(),
        ConnectionOptions {
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(100)),
            ..options()
        },
    )
    .unwrap()
    .open(Room::machines());

    wait_status(&stays_down, ConnectionStatus::is_connected).await;
    wait_status(&rejoins, ConnectionStatus::is_connected).await;
    assert!(backend.wait_for_joins(2, WAIT).await);

    backend.drop_connections();

    let status = wait_status(&stays_down, |s| s.error().is_some()).await;
    assert!(matches!(status, ConnectionStatus::Error(TransportError::Disconnected(_))));

    assert!(backend.wait_for_joins(3, WAIT).await);
    wait_status(&rejoins, ConnectionStatus::is_connected).await;
    let machine_joins = backend.joins().iter().filter(|r| r.as_str() == "room:machines").count();
    assert_eq!(machine_joins, 2);

    // The reconnected socket delivers again
    let mut sub = rejoins.subscribe(&["detail:event"]);
    backend.emit("room:machines", "detail:event", json!({"status": "updated"}));
    assert!(tokio::time::timeout(WAIT, sub.recv()).await.unwrap().is_some());

    stays_down.close().await;
    rejoins.close().await;
}
