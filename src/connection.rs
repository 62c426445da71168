//! Command-issuing half of the client.
//!
//! One socket to `/ws/sync`. Outbound frames go through an mpsc queue drained
//! by a writer task; a reader task resolves acks by id and hands every other
//! frame to the shared [`Reconciler`]. Because the server queues a command's
//! broadcast ahead of its ack, the reconciler has already re-anchored by the
//! time a command's future resolves.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    client::Reconciler,
    error::AckError,
    event::Participant,
    protocol::{Ack, ServerFrame},
    sync::InitState,
    video::{self, VideoSnapshot},
};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lowest rate the client will ask for; the server itself accepts anything above zero.
pub const MIN_LOCAL_RATE: f64 = 0.25;

pub type ClientResult<T> = Result<T, AckError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReply {
    pub channel:      String,
    pub video_state:  VideoSnapshot,
    pub server_time:  i64,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl JoinReply {
    fn init(&self) -> InitState {
        InitState { video_state: self.video_state.clone(), server_time: self.server_time }
    }
}

#[derive(Debug, Clone)]
struct Seat {
    room_id:        String,
    participant_id: String,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Ack>>>>;

fn local(code: &str, message: impl Into<String>) -> AckError {
    AckError { code: code.into(), message: message.into() }
}

pub struct SyncClient {
    reconciler:  Arc<Reconciler>,
    state:       Arc<RwLock<ConnectionState>>,
    outgoing:    mpsc::UnboundedSender<Message>,
    pending:     Pending,
    next_ack:    AtomicU64,
    seat:        RwLock<Option<Seat>>,
    ack_timeout: Duration,
}

impl SyncClient {
    /// Opens the socket. A failed handshake is reported to the error
    /// listeners as `CONNECTION_ERROR` as well as returned.
    pub async fn connect(url: &str, reconciler: Arc<Reconciler>) -> ClientResult<Self> {
        let ws = match connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                let err = local("CONNECTION_ERROR", e.to_string());
                reconciler.notify_error(&err);
                return Err(err);
            }
        };
        let (mut writer, mut reader) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let pending: Pending = Arc::default();
        tokio::spawn({
            let (reconciler, state, pending) = (reconciler.clone(), state.clone(), pending.clone());
            async move {
                while let Some(msg) = reader.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(ServerFrame::Ack(frame)) => {
                                let waiter = match frame.id {
                                    Some(id) => pending.lock().await.remove(&id),
                                    None     => None,
                                };
                                match (waiter, frame.id) {
                                    (Some(tx), _) => { let _ = tx.send(frame.ack); }
                                    // server could not read one of our frames
                                    (None, None) => { let _ = reconciler.settle(frame.ack); }
                                    (None, Some(id)) => debug!(id, "late ack dropped"),
                                }
                            }
                            Ok(frame) => reconciler.handle_frame(&frame),
                            Err(e) => warn!(error = %e, "unreadable server frame"),
                        },
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                *state.write().await = ConnectionState::Disconnected;
                // dropping the senders fails every outstanding request
                pending.lock().await.clear();
                info!("sync socket closed");
            }
        });

        Ok(Self {
            reconciler,
            state,
            outgoing: out_tx,
            pending,
            next_ack: AtomicU64::new(1),
            seat: RwLock::new(None),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        })
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> { &self.reconciler }

    pub async fn connection_state(&self) -> ConnectionState { *self.state.read().await }

    /// Room joined through this client, if any.
    pub async fn room_id(&self) -> Option<String> {
        self.seat.read().await.as_ref().map(|s| s.room_id.clone())
    }

    /// Joins a room and anchors the reconciler on the returned snapshot.
    /// Later commands are issued for this room as `participant_id`.
    pub async fn join(&self, room_id: &str, participant_id: &str, nickname: Option<&str>) -> ClientResult<JoinReply> {
        let data = self
            .request("sync:join", json!({"roomId": room_id, "participantId": participant_id, "nickname": nickname}))
            .await?;
        let reply: JoinReply = decode(data)?;
        self.reconciler.apply_init(&reply.init());
        *self.seat.write().await = Some(Seat {
            room_id:        room_id.to_string(),
            participant_id: participant_id.to_string(),
        });
        Ok(reply)
    }

    /// Snapshot of any room; does not join it.
    pub async fn init_state(&self, room_id: &str) -> ClientResult<InitState> {
        let init: InitState = decode(self.request("sync:init", json!({"roomId": room_id})).await?)?;
        self.reconciler.apply_init(&init);
        Ok(init)
    }

    pub async fn play(&self) -> ClientResult<Value> { self.command("sync:play", json!({})).await }

    pub async fn pause(&self) -> ClientResult<Value> { self.command("sync:pause", json!({})).await }

    pub async fn seek(&self, progress: f64) -> ClientResult<Value> {
        if !video::valid_progress(progress) {
            return Err(local("VALIDATION_ERROR", "progress must be a non-negative number"));
        }
        self.command("sync:seek", json!({"progress": progress})).await
    }

    pub async fn change_rate(&self, rate: f64) -> ClientResult<Value> {
        if !(MIN_LOCAL_RATE..=video::MAX_RATE).contains(&rate) {
            return Err(local("VALIDATION_ERROR", format!("rate must be within [{MIN_LOCAL_RATE}, {}]", video::MAX_RATE)));
        }
        self.command("sync:changeRate", json!({"rate": rate})).await
    }

    pub async fn change_subtitle(&self, subtitle: Option<&str>) -> ClientResult<Value> {
        self.command("sync:changeSubtitle", json!({"subtitle": subtitle})).await
    }

    pub async fn change_source(&self, source_url: Option<&str>) -> ClientResult<Value> {
        self.command("sync:changeSource", json!({"sourceUrl": source_url})).await
    }

    /// Leaves the joined room, if any. The seat is dropped even when the
    /// server cannot be told.
    pub async fn leave(&self) -> ClientResult<()> {
        let Some(seat) = self.seat.write().await.take() else {
            return Ok(());
        };
        self.request("sync:leave", json!({"roomId": seat.room_id, "participantId": seat.participant_id}))
            .await
            .map(|_| ())
    }

    /// Leaves, drops every listener and closes the socket.
    pub async fn disconnect(&self) {
        if self.connection_state().await == ConnectionState::Connected {
            if let Err(e) = self.leave().await {
                debug!(code = %e.code, "leave on disconnect failed");
            }
        }
        self.seat.write().await.take();
        self.reconciler.clear();
        let _ = self.outgoing.send(Message::Close(None));
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn command(&self, event: &str, mut data: Value) -> ClientResult<Value> {
        self.ensure_connected().await?;
        let seat = self
            .seat
            .read()
            .await
            .clone()
            .ok_or_else(|| local("NOT_JOINED", "join a room first"))?;
        if let Value::Object(m) = &mut data {
            m.insert("roomId".into(), seat.room_id.into());
            m.insert("operatorId".into(), seat.participant_id.into());
        }
        self.request(event, data).await
    }

    async fn ensure_connected(&self) -> ClientResult<()> {
        match self.connection_state().await {
            ConnectionState::Connected    => Ok(()),
            ConnectionState::Disconnected => Err(local("NOT_CONNECTED", "socket is not connected")),
        }
    }

    /// Sends one frame and waits for its ack; failed acks reach the error listeners.
    async fn request(&self, event: &str, data: Value) -> ClientResult<Value> {
        self.ensure_connected().await?;
        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = json!({"event": event, "ack": id, "data": data});
        if self.outgoing.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(self.lost("socket writer stopped"));
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => self.reconciler.settle(ack),
            Ok(Err(_)) => Err(self.lost("connection closed before ack")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let err = local("TIMEOUT", format!("{event} was not acknowledged"));
                self.reconciler.notify_error(&err);
                Err(err)
            }
        }
    }

    fn lost(&self, why: &str) -> AckError {
        let err = local("CONNECTION_ERROR", why);
        self.reconciler.notify_error(&err);
        err
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> ClientResult<T> {
    serde_json::from_value(data).map_err(|e| local("PROTOCOL_ERROR", e.to_string()))
}
