use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

use crate::{protocol::ServerFrame, registry::ConnId};

/// Per-connection mailbox; a writer task drains it into the socket.
pub type Outbox = mpsc::UnboundedSender<ServerFrame>;

/* ------------ 房間頻道 ------------ */
#[derive(Default)]
struct Inner {
    outboxes: HashMap<ConnId, Outbox>,
    topics:   HashMap<String, HashSet<ConnId>>,
}

/// Room topics: which live connections hear a room's broadcasts.
#[derive(Default)]
pub struct Topics {
    inner: RwLock<Inner>,
}

pub fn channel_name(room_id: &str) -> String { format!("room:{room_id}") }

impl Topics {
    pub fn new() -> Self { Self::default() }

    pub async fn attach(&self, conn: ConnId, outbox: Outbox) {
        self.inner.write().await.outboxes.insert(conn, outbox);
    }

    /// Forgets the connection everywhere. Safe to call twice.
    pub async fn detach(&self, conn: ConnId) {
        let mut g = self.inner.write().await;
        g.outboxes.remove(&conn);
        g.topics.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    pub async fn subscribe(&self, room_id: &str, conn: ConnId) {
        self.inner.write().await.topics.entry(room_id.to_string()).or_default().insert(conn);
    }

    pub async fn unsubscribe(&self, room_id: &str, conn: ConnId) {
        let mut g = self.inner.write().await;
        if let Some(members) = g.topics.get_mut(room_id) {
            members.remove(&conn);
            if members.is_empty() {
                g.topics.remove(room_id);
            }
        }
    }

    pub async fn subscribers(&self, room_id: &str) -> usize {
        self.inner.read().await.topics.get(room_id).map_or(0, HashSet::len)
    }

    /// Fans `frame` out to every subscriber of `room_id` except `skip`.
    /// Returns how many mailboxes accepted it.
    pub async fn publish(&self, room_id: &str, frame: &ServerFrame, skip: Option<ConnId>) -> usize {
        let g = self.inner.read().await;
        let Some(members) = g.topics.get(room_id) else { return 0 };
        let delivered = members
            .iter()
            .filter(|c| Some(**c) != skip)
            .filter_map(|c| g.outboxes.get(c))
            .filter(|tx| tx.send(frame.clone()).is_ok())
            .count();
        trace!(room = room_id, delivered, "published");
        delivered
    }

    pub async fn send_to(&self, conn: ConnId, frame: ServerFrame) -> bool {
        match self.inner.read().await.outboxes.get(&conn) {
            Some(tx) => tx.send(frame).is_ok(),
            None     => false,
        }
    }
}
