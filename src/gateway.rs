//! Event gateway: turns inbound frames into processor calls and fans results
//! out to room topics. Owns the membership registry and the topic map.
//!
//! Every command resolves to exactly one [`Ack`] and at most one broadcast.
//! State-changing events go to the whole room, issuer included; `member:joined`
//! skips the joiner.

use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{SyncErr, SyncResult},
    event::{MemberEvent, Participant},
    protocol::{Ack, AckFrame, ClientFrame, Command, ServerFrame},
    registry::{ConnId, MemberRegistry, Membership},
    room::RoomStore,
    state::{channel_name, Outbox, Topics},
    sync::{CommandOutcome, SyncService},
};

pub const DEFAULT_ROSTER_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SyncGateway {
    sync:           Arc<SyncService>,
    rooms:          Arc<dyn RoomStore>,
    members:        MemberRegistry,
    topics:         Topics,
    roster_timeout: Duration,
}

impl SyncGateway {
    pub fn new(rooms: Arc<dyn RoomStore>, roster_timeout: Duration) -> Self {
        Self {
            sync: Arc::new(SyncService::new(rooms.clone())),
            rooms,
            members: MemberRegistry::new(),
            topics: Topics::new(),
            roster_timeout,
        }
    }

    pub fn sync(&self) -> &SyncService { &self.sync }

    pub fn members(&self) -> &MemberRegistry { &self.members }

    pub fn topics(&self) -> &Topics { &self.topics }

    /// Registers a live connection and its mailbox.
    pub async fn connect(&self, outbox: Outbox) -> ConnId {
        let conn = Uuid::new_v4();
        self.topics.attach(conn, outbox).await;
        debug!(%conn, "connected");
        conn
    }

    /// Transport entry point: parse, dispatch, and queue the ack behind any
    /// broadcast this command produced.
    pub async fn handle_text(&self, conn: ConnId, raw: &str) {
        let (id, ack) = match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => (frame.ack, self.dispatch(conn, &frame.event, &frame.data).await),
            Err(e) => (None, Ack::err(&SyncErr::validation(format!("malformed frame: {e}")))),
        };
        self.topics.send_to(conn, ServerFrame::Ack(AckFrame { id, ack })).await;
    }

    pub async fn dispatch(&self, conn: ConnId, event: &str, data: &Value) -> Ack {
        let cmd = match Command::parse(event, data) {
            Ok(cmd) => cmd,
            Err(e)  => {
                debug!(%conn, event, error = %e, "rejected before processing");
                return Ack::err(&e);
            }
        };
        Ack::from_result(self.execute(conn, cmd).await)
    }

    async fn execute(&self, conn: ConnId, cmd: Command) -> SyncResult<Value> {
        let outcome = match cmd {
            Command::Join { room_id, participant_id, nickname } => {
                return self.join(conn, &room_id, &participant_id, nickname.as_deref()).await;
            }
            Command::Leave { room_id, participant_id } => {
                return Ok(self.leave(conn, &room_id, &participant_id).await);
            }
            Command::Init { room_id } => {
                let init = self.sync.init_state(&room_id).await?;
                return to_value(&init);
            }
            Command::Play { room_id, operator_id } => self.sync.play(&room_id, &operator_id).await?,
            Command::Pause { room_id, operator_id } => self.sync.pause(&room_id, &operator_id).await?,
            Command::Seek { room_id, operator_id, progress } => {
                self.sync.seek(&room_id, &operator_id, progress).await?
            }
            Command::ChangeRate { room_id, operator_id, rate } => {
                self.sync.change_rate(&room_id, &operator_id, rate).await?
            }
            Command::ChangeSubtitle { room_id, operator_id, subtitle } => {
                self.sync.change_subtitle(&room_id, &operator_id, subtitle).await?
            }
            Command::ChangeSource { room_id, operator_id, source_url } => {
                self.sync.change_source(&room_id, &operator_id, source_url).await?
            }
        };
        self.announce(outcome).await
    }

    async fn announce(&self, outcome: CommandOutcome) -> SyncResult<Value> {
        let CommandOutcome { event, .. } = outcome;
        let room_id = event.room_id().to_string();
        self.topics.publish(&room_id, &ServerFrame::Sync(event.clone()), None).await;
        Ok(json!({ "event": to_value(&event)? }))
    }

    /* ------------ 進房 / 離房 ------------ */

    pub async fn join(
        &self,
        conn: ConnId,
        room_id: &str,
        participant_id: &str,
        nickname: Option<&str>,
    ) -> SyncResult<Value> {
        let init = self.sync.init_state(room_id).await?;
        let entry = Membership::new(room_id, participant_id, nickname);

        if let Some(prev) = self.members.insert(conn, entry.clone()).await {
            if prev.room_id != room_id {
                self.topics.unsubscribe(&prev.room_id, conn).await;
                self.announce_left(&prev).await;
            }
        }
        self.topics.subscribe(room_id, conn).await;

        let participants = self.roster(room_id).await;
        let notice = MemberEvent::new(room_id, participant_id, &entry.nickname, participants.clone());
        self.topics.publish(room_id, &ServerFrame::MemberJoined(notice), Some(conn)).await;

        info!(room = room_id, participant = participant_id, nickname = %entry.nickname, %conn, "joined");
        Ok(json!({
            "channel":      channel_name(room_id),
            "videoState":   to_value(&init.video_state)?,
            "serverTime":   init.server_time,
            "participants": to_value(&participants)?,
        }))
    }

    /// Only the call that actually removes the entry announces the departure.
    pub async fn leave(&self, conn: ConnId, room_id: &str, participant_id: &str) -> Value {
        self.topics.unsubscribe(room_id, conn).await;
        match self.members.take(conn).await {
            Some(entry) => {
                if entry.room_id != room_id {
                    self.topics.unsubscribe(&entry.room_id, conn).await;
                }
                self.announce_left(&entry).await;
            }
            None => debug!(%conn, room = room_id, participant = participant_id, "leave without membership"),
        }
        json!({ "message": "left sync channel" })
    }

    /// Idempotent; the room may already be gone.
    pub async fn disconnect(&self, conn: ConnId) {
        let entry = self.members.take(conn).await;
        self.topics.detach(conn).await;
        match entry {
            Some(entry) => self.announce_left(&entry).await,
            None        => debug!(%conn, "disconnected without membership"),
        }
    }

    async fn announce_left(&self, entry: &Membership) {
        let participants = self.roster(&entry.room_id).await;
        let notice = MemberEvent::new(&entry.room_id, &entry.participant_id, &entry.nickname, participants);
        self.topics.publish(&entry.room_id, &ServerFrame::MemberLeft(notice), None).await;
        info!(room = %entry.room_id, participant = %entry.participant_id, "left");
    }

    /// Best effort: a failed or slow lookup yields an empty roster.
    async fn roster(&self, room_id: &str) -> Vec<Participant> {
        match tokio::time::timeout(self.roster_timeout, self.rooms.participants(room_id)).await {
            Ok(Ok(list)) => list,
            Ok(Err(e))   => {
                warn!(room = room_id, error = %e, "roster fetch failed");
                Vec::new()
            }
            Err(_) => {
                warn!(room = room_id, "roster fetch timed out");
                Vec::new()
            }
        }
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> SyncResult<Value> {
    serde_json::to_value(v).map_err(|e| SyncErr::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::InMemoryRooms;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn gateway() -> (InMemoryRooms, SyncGateway, String) {
        let rooms = InMemoryRooms::new();
        let id = rooms.create("gw", "host").await.id;
        let gw = SyncGateway::new(Arc::new(rooms.clone()), DEFAULT_ROSTER_TIMEOUT);
        (rooms, gw, id)
    }

    async fn conn(gw: &SyncGateway) -> (ConnId, UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (gw.connect(tx).await, rx)
    }

    #[tokio::test]
    async fn invalid_command_never_reaches_processor() {
        let (rooms, gw, id) = gateway().await;
        let (c, mut rx) = conn(&gw).await;
        gw.join(c, &id, "host", None).await.unwrap();

        let ack = gw.dispatch(c, "sync:seek", &json!({"roomId": id, "operatorId": "host", "progress": -5})).await;
        assert!(!ack.ok);
        assert_eq!(ack.error.unwrap().code, "VALIDATION_ERROR");
        assert!(rx.try_recv().is_err());
        assert_eq!(rooms.get(&id).await.unwrap().video.progress, 0.0);
    }

    #[tokio::test]
    async fn issuer_receives_its_own_event() {
        let (_rooms, gw, id) = gateway().await;
        let (c, mut rx) = conn(&gw).await;
        gw.join(c, &id, "host", None).await.unwrap();

        let ack = gw.dispatch(c, "sync:seek", &json!({"roomId": id, "operatorId": "host", "progress": 8})).await;
        assert!(ack.ok);
        assert_eq!(ack.data.unwrap()["event"]["type"], "SEEK");
        match rx.try_recv().unwrap() {
            ServerFrame::Sync(ev) => assert_eq!(ev.payload().progress, 8.0),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_without_join_is_silent() {
        let (_rooms, gw, id) = gateway().await;
        let (watcher, mut wrx) = conn(&gw).await;
        gw.join(watcher, &id, "host", None).await.unwrap();
        let (stranger, _srx) = conn(&gw).await;

        gw.disconnect(stranger).await;
        gw.disconnect(stranger).await;
        assert!(wrx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_after_disconnect_announces_once() {
        let (_rooms, gw, id) = gateway().await;
        let (a, _arx) = conn(&gw).await;
        let (b, mut brx) = conn(&gw).await;
        gw.join(b, &id, "host", None).await.unwrap();
        gw.join(a, &id, "guest", Some("G")).await.unwrap();
        while brx.try_recv().is_ok() {}

        tokio::join!(gw.disconnect(a), gw.leave(a, &id, "guest"));

        let mut left = 0;
        while let Ok(frame) = brx.try_recv() {
            if let ServerFrame::MemberLeft(ev) = frame {
                assert_eq!(ev.participant.id, "guest");
                left += 1;
            }
        }
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn rejoin_other_room_leaves_first() {
        let (rooms, gw, r1) = gateway().await;
        let r2 = rooms.create("second", "host").await.id;
        let (a, _arx) = conn(&gw).await;
        let (w, mut wrx) = conn(&gw).await;
        gw.join(w, &r1, "host", None).await.unwrap();
        gw.join(a, &r1, "guest", None).await.unwrap();
        while wrx.try_recv().is_ok() {}

        gw.join(a, &r2, "guest", None).await.unwrap();
        assert!(matches!(wrx.try_recv().unwrap(), ServerFrame::MemberLeft(_)));
        assert_eq!(gw.topics().subscribers(&r1).await, 1);
        assert_eq!(gw.topics().subscribers(&r2).await, 1);
        assert_eq!(gw.members().len().await, 2);
    }

    #[tokio::test]
    async fn leave_of_destroyed_room_still_broadcasts_empty_roster() {
        let (rooms, gw, id) = gateway().await;
        rooms.add_member(&id, Participant::new("host", "H")).await.unwrap();
        let (a, _arx) = conn(&gw).await;
        let (w, mut wrx) = conn(&gw).await;
        gw.join(w, &id, "host", None).await.unwrap();
        gw.join(a, &id, "guest", None).await.unwrap();
        while wrx.try_recv().is_ok() {}

        rooms.destroy(&id).await;
        gw.disconnect(a).await;
        match wrx.try_recv().unwrap() {
            ServerFrame::MemberLeft(ev) => {
                assert_eq!(ev.participant.id, "guest");
                assert!(ev.participants.is_empty());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_unknown_room_subscribes_nothing() {
        let (_rooms, gw, _id) = gateway().await;
        let (a, _arx) = conn(&gw).await;
        let ack = gw.dispatch(a, "sync:join", &json!({"roomId": "nope", "participantId": "p"})).await;
        assert_eq!(ack.error.unwrap().code, "ROOM_NOT_FOUND");
        assert_eq!(gw.members().len().await, 0);
        assert_eq!(gw.topics().subscribers("nope").await, 0);
    }

    #[tokio::test]
    async fn malformed_frame_gets_validation_ack() {
        let (_rooms, gw, _id) = gateway().await;
        let (a, mut arx) = conn(&gw).await;
        gw.handle_text(a, "{not json").await;
        match arx.try_recv().unwrap() {
            ServerFrame::Ack(AckFrame { id, ack }) => {
                assert_eq!(id, None);
                assert_eq!(ack.error.unwrap().code, "VALIDATION_ERROR");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
