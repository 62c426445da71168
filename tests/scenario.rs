//! Creator/guest walkthrough against the gateway with in-process mailboxes.

use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use watch_sync::{
    client::Reconciler,
    event::{Participant, SyncEventType},
    gateway::SyncGateway,
    protocol::ServerFrame,
    registry::ConnId,
    room::InMemoryRooms,
    video::PlayStatus,
};

async fn connect(gw: &SyncGateway) -> (ConnId, UnboundedReceiver<ServerFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (gw.connect(tx).await, rx)
}

fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut out = Vec::new();
    while let Ok(f) = rx.try_recv() {
        out.push(f);
    }
    out
}

#[tokio::test]
async fn creator_drives_guest() {
    let rooms = InMemoryRooms::new();
    let r1 = rooms.create("R1", "C").await.id;
    let gw = SyncGateway::new(Arc::new(rooms.clone()), Duration::from_millis(500));

    // C joins an empty room
    let (c, mut c_rx) = connect(&gw).await;
    let ack = gw.dispatch(c, "sync:join", &json!({"roomId": r1, "participantId": "C", "nickname": "Creator"})).await;
    assert!(ack.ok);
    let data = ack.data.unwrap();
    assert_eq!(data["participants"], json!([]));
    assert_eq!(data["channel"], format!("room:{r1}"));
    assert_eq!(data["videoState"]["status"], "stopped");
    rooms.add_member(&r1, Participant::new("C", "Creator")).await.unwrap();

    // P joins and sees C in the roster; C is told about P
    rooms.add_member(&r1, Participant::new("P", "Guest")).await.unwrap();
    let (p, mut p_rx) = connect(&gw).await;
    let ack = gw.dispatch(p, "sync:join", &json!({"roomId": r1, "participantId": "P", "nickname": "Guest"})).await;
    assert!(ack.ok);
    let roster = ack.data.unwrap()["participants"].clone();
    assert!(roster.as_array().unwrap().iter().any(|m| m["id"] == "C"));

    match drain(&mut c_rx).as_slice() {
        [ServerFrame::MemberJoined(ev)] => assert_eq!(ev.participant.id, "P"),
        other => panic!("C expected one member:joined, got {other:?}"),
    }
    assert!(drain(&mut p_rx).is_empty());

    // C plays: both receive the same PLAY event
    let ack = gw.dispatch(c, "sync:play", &json!({"roomId": r1, "operatorId": "C"})).await;
    assert!(ack.ok);
    for rx in [&mut c_rx, &mut p_rx] {
        match drain(rx).as_slice() {
            [ServerFrame::Sync(ev)] => {
                assert_eq!(ev.kind(), SyncEventType::Play);
                assert_eq!(ev.operator_id(), "C");
                assert_eq!(ev.payload().status, PlayStatus::Playing);
            }
            other => panic!("expected one sync:event, got {other:?}"),
        }
    }

    // P is not allowed to pause
    let ack = gw.dispatch(p, "sync:pause", &json!({"roomId": r1, "operatorId": "P"})).await;
    assert!(!ack.ok);
    assert_eq!(ack.error.unwrap().code, "PERMISSION_DENIED");
    assert!(drain(&mut c_rx).is_empty());
    assert!(drain(&mut p_rx).is_empty());

    // C drops; P hears about it
    gw.disconnect(c).await;
    match drain(&mut p_rx).as_slice() {
        [ServerFrame::MemberLeft(ev)] => assert_eq!(ev.participant.id, "C"),
        other => panic!("expected one member:left, got {other:?}"),
    }
}

#[tokio::test]
async fn guest_reconciler_tracks_the_room() {
    let rooms = InMemoryRooms::new();
    let id = rooms.create("movie", "host").await.id;
    let gw = SyncGateway::new(Arc::new(rooms.clone()), Duration::from_millis(500));

    let (host, _host_rx) = connect(&gw).await;
    gw.join(host, &id, "host", None).await.unwrap();
    let (guest, mut guest_rx) = connect(&gw).await;
    gw.join(guest, &id, "guest", None).await.unwrap();

    let reconciler = Reconciler::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = seen.clone();
    reconciler.on_sync_event(move |ev| s.lock().unwrap().push(ev.kind()));

    for (event, data) in [
        ("sync:changeSource", json!({"roomId": id, "operatorId": "host", "sourceUrl": "https://cdn/x.mp4"})),
        ("sync:seek",         json!({"roomId": id, "operatorId": "host", "progress": 120})),
        ("sync:changeRate",   json!({"roomId": id, "operatorId": "host", "rate": 2})),
        ("sync:play",         json!({"roomId": id, "operatorId": "host"})),
        ("sync:pause",        json!({"roomId": id, "operatorId": "host"})),
    ] {
        assert!(gw.dispatch(host, event, &data).await.ok, "{event} failed");
    }
    for frame in drain(&mut guest_rx) {
        reconciler.handle_frame(&frame);
    }

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            SyncEventType::ChangeSource,
            SyncEventType::Seek,
            SyncEventType::ChangeRate,
            SyncEventType::Play,
            SyncEventType::Pause,
        ]
    );
    let anchor = reconciler.anchor().unwrap();
    assert_eq!(anchor.status, PlayStatus::Paused);
    assert_eq!(anchor.playback_rate, 2.0);
    assert!(anchor.progress >= 120.0);

    // the paused anchor equals what a fresh init reports
    let init = gw.sync().init_state(&id).await.unwrap();
    assert_eq!(init.video_state.progress, anchor.progress);
}

#[tokio::test]
async fn closed_room_rejects_control_but_allows_init() {
    let rooms = InMemoryRooms::new();
    let id = rooms.create("late", "host").await.id;
    let gw = SyncGateway::new(Arc::new(rooms.clone()), Duration::from_millis(500));
    let (host, mut rx) = connect(&gw).await;
    gw.join(host, &id, "host", None).await.unwrap();
    rooms.close(&id).await.unwrap();

    let ack = gw.dispatch(host, "sync:seek", &json!({"roomId": id, "operatorId": "host", "progress": 1})).await;
    assert_eq!(ack.error.unwrap().code, "ROOM_CLOSED");
    assert!(drain(&mut rx).is_empty());

    let ack = gw.dispatch(host, "sync:init", &json!({"roomId": id})).await;
    assert!(ack.ok);
    assert!(ack.data.unwrap()["serverTime"].as_i64().is_some());
}
