//! End-to-end over a real socket: server on an ephemeral port, two clients.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpStream, time::{timeout, Duration}};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use watch_sync::{
    client::Reconciler,
    config::Config,
    connection::{ConnectionState, SyncClient},
    room::InMemoryRooms,
    video::PlayStatus,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(rooms: Arc<InMemoryRooms>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (app, _gw) = watch_sync::app(&Config::default(), rooms);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("ws://{addr}/ws/sync")
}

async fn send(ws: &mut Ws, event: &str, ack: u64, data: Value) {
    let frame = json!({"event": event, "ack": ack, "data": data});
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping pings.
async fn next(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next()).await.expect("timed out").unwrap().unwrap();
        if let Message::Text(t) = msg {
            return serde_json::from_str(&t).unwrap();
        }
    }
}

/// Polls until `check` holds; reader tasks deliver notifications asynchronously.
async fn eventually(check: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn seek_reaches_both_clients() {
    let rooms = Arc::new(InMemoryRooms::new());
    let id = rooms.create("e2e", "host").await.id;
    let url = start_server(rooms.clone()).await;

    let (mut host, _) = connect_async(url.as_str()).await.unwrap();
    let (mut guest, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut host, "sync:join", 1, json!({"roomId": id, "participantId": "host"})).await;
    let ack = next(&mut host).await;
    assert_eq!(ack["event"], "ack");
    assert_eq!(ack["data"]["id"], 1);
    assert_eq!(ack["data"]["ok"], true);

    send(&mut guest, "sync:join", 1, json!({"roomId": id, "participantId": "guest", "nickname": "G"})).await;
    assert_eq!(next(&mut guest).await["data"]["ok"], true);
    let joined = next(&mut host).await;
    assert_eq!(joined["event"], "member:joined");
    assert_eq!(joined["data"]["participant"]["nickname"], "G");

    send(&mut host, "sync:seek", 2, json!({"roomId": id, "operatorId": "host", "progress": 42.5})).await;
    // the issuer sees the broadcast before its ack
    let ev = next(&mut host).await;
    assert_eq!(ev["event"], "sync:event");
    assert_eq!(ev["data"]["type"], "SEEK");
    let ack = next(&mut host).await;
    assert_eq!(ack["data"]["id"], 2);
    assert_eq!(ack["data"]["data"]["event"]["payload"]["progress"], 42.5);

    let ev = next(&mut guest).await;
    assert_eq!(ev["data"]["payload"]["progress"], 42.5);
    assert_eq!(ev["data"]["operatorId"], "host");

    send(&mut guest, "sync:changeRate", 2, json!({"roomId": id, "operatorId": "guest", "rate": 9})).await;
    let ack = next(&mut guest).await;
    assert_eq!(ack["data"]["ok"], false);
    assert_eq!(ack["data"]["error"]["code"], "VALIDATION_ERROR");

    host.close(None).await.unwrap();
    let left = next(&mut guest).await;
    assert_eq!(left["event"], "member:left");
    assert_eq!(left["data"]["participant"]["id"], "host");
}

#[tokio::test]
async fn sync_client_issues_commands_and_tracks_room() {
    let rooms = Arc::new(InMemoryRooms::new());
    let id = rooms.create("clients", "host").await.id;
    let url = start_server(rooms.clone()).await;

    let host_view = Arc::new(Reconciler::new());
    let host = SyncClient::connect(&url, host_view.clone()).await.unwrap();
    let guest_view = Arc::new(Reconciler::new());
    let guest = SyncClient::connect(&url, guest_view.clone()).await.unwrap();

    let guest_errors = Arc::new(std::sync::Mutex::new(Vec::new()));
    let e = guest_errors.clone();
    guest_view.on_error(move |err| e.lock().unwrap().push(err.code.clone()));
    let departures = Arc::new(std::sync::Mutex::new(Vec::new()));
    let d = departures.clone();
    host_view.on_member_left(move |ev| d.lock().unwrap().push(ev.participant.id.clone()));

    assert_eq!(host.play().await.unwrap_err().code, "NOT_JOINED");

    let joined = host.join(&id, "host", Some("Host")).await.unwrap();
    assert_eq!(joined.channel, format!("room:{id}"));
    assert_eq!(joined.video_state.status, PlayStatus::Stopped);
    assert_eq!(host_view.anchor().unwrap().progress, 0.0);
    guest.join(&id, "guest", None).await.unwrap();
    assert_eq!(guest.room_id().await.as_deref(), Some(id.as_str()));

    // rejected locally, nothing reaches the room
    assert_eq!(host.change_rate(0.1).await.unwrap_err().code, "VALIDATION_ERROR");
    assert_eq!(host.seek(-1.0).await.unwrap_err().code, "VALIDATION_ERROR");

    host.seek(42.5).await.unwrap();
    // the broadcast is queued ahead of the ack
    assert_eq!(host_view.anchor().unwrap().progress, 42.5);
    eventually(|| guest_view.anchor().map(|a| a.progress) == Some(42.5)).await;

    host.change_rate(2.0).await.unwrap();
    eventually(|| guest_view.anchor().map(|a| a.playback_rate) == Some(2.0)).await;

    let denied = guest.pause().await.unwrap_err();
    assert_eq!(denied.code, "PERMISSION_DENIED");
    assert_eq!(*guest_errors.lock().unwrap(), vec!["PERMISSION_DENIED".to_string()]);

    let init = guest.init_state(&id).await.unwrap();
    assert_eq!(init.video_state.progress, 42.5);
    assert_eq!(init.video_state.playback_rate, 2.0);

    guest.leave().await.unwrap();
    assert!(guest.room_id().await.is_none());
    assert_eq!(guest.play().await.unwrap_err().code, "NOT_JOINED");
    eventually(|| *departures.lock().unwrap() == vec!["guest".to_string()]).await;

    host.disconnect().await;
    assert_eq!(host.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(host_view.listener_count(), 0);
    assert_eq!(host.play().await.unwrap_err().code, "NOT_CONNECTED");
}

#[tokio::test]
async fn unreachable_server_reports_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let view = Arc::new(Reconciler::new());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = seen.clone();
    view.on_error(move |err| s.lock().unwrap().push(err.code.clone()));

    let err = SyncClient::connect(&format!("ws://{addr}/ws/sync"), view).await.err().unwrap();
    assert_eq!(err.code, "CONNECTION_ERROR");
    assert_eq!(*seen.lock().unwrap(), vec!["CONNECTION_ERROR".to_string()]);
}
