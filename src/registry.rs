//! Live connection → (room, participant) mapping.
//!
//! At most one entry per connection. Removal is a single take under the write
//! lock, which is what makes leave/disconnect races announce exactly once.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnId = Uuid;

pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub room_id:        String,
    pub participant_id: String,
    pub nickname:       String,
}

impl Membership {
    pub fn new(room_id: &str, participant_id: &str, nickname: Option<&str>) -> Self {
        let nickname = nickname.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(ANONYMOUS);
        Self {
            room_id:        room_id.to_string(),
            participant_id: participant_id.to_string(),
            nickname:       nickname.to_string(),
        }
    }
}

#[derive(Default)]
pub struct MemberRegistry {
    entries: RwLock<HashMap<ConnId, Membership>>,
}

impl MemberRegistry {
    pub fn new() -> Self { Self::default() }

    /// Records `entry` for `conn`, returning whatever it replaced.
    pub async fn insert(&self, conn: ConnId, entry: Membership) -> Option<Membership> {
        self.entries.write().await.insert(conn, entry)
    }

    pub async fn take(&self, conn: ConnId) -> Option<Membership> {
        self.entries.write().await.remove(&conn)
    }

    pub async fn get(&self, conn: ConnId) -> Option<Membership> {
        self.entries.read().await.get(&conn).cloned()
    }

    pub async fn connections_in(&self, room_id: &str) -> Vec<ConnId> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, m)| m.room_id == room_id)
            .map(|(c, _)| *c)
            .collect()
    }

    pub async fn len(&self) -> usize { self.entries.read().await.len() }
}
