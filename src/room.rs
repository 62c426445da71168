//! Room collaborator: the narrow interface the sync core needs from whoever
//! owns room lifecycle, plus an in-memory implementation for the server binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::{
    clock,
    error::StoreErr,
    event::Participant,
    video::{VideoSnapshot, VideoState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id:           String,
    pub name:         String,
    pub creator_id:   String,
    pub status:       RoomStatus,
    pub video:        VideoState,
    pub participants: Vec<Participant>,
    pub created_at:   i64,
}

/// What the command processor hands back alongside the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    pub id:           String,
    pub name:         String,
    pub creator_id:   String,
    pub status:       RoomStatus,
    pub video_state:  VideoSnapshot,
    pub participants: Vec<Participant>,
    pub created_at:   i64,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, creator_id: impl Into<String>) -> Self {
        let now = clock::now_ms();
        Self {
            id:           id.into(),
            name:         name.into(),
            creator_id:   creator_id.into(),
            status:       RoomStatus::Waiting,
            video:        VideoState::new(now),
            participants: Vec::new(),
            created_at:   now,
        }
    }

    pub fn is_creator(&self, operator_id: &str) -> bool { self.creator_id == operator_id }

    pub fn is_closed(&self) -> bool { self.status == RoomStatus::Closed }

    pub fn detail(&self, now: i64) -> RoomDetail {
        RoomDetail {
            id:           self.id.clone(),
            name:         self.name.clone(),
            creator_id:   self.creator_id.clone(),
            status:       self.status,
            video_state:  self.video.snapshot(now),
            participants: self.participants.clone(),
            created_at:   self.created_at,
        }
    }
}

/// Fetch-then-mutate-then-save access to rooms. Implementations may live out
/// of process; callers never hold references into the store.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn find(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreErr>;

    /// Must fail with [`StoreErr::Closed`] rather than overwrite a room that
    /// was closed since it was fetched.
    async fn save(&self, room: &RoomRecord) -> Result<(), StoreErr>;

    async fn participants(&self, room_id: &str) -> Result<Vec<Participant>, StoreErr>;
}

/* ------------ 記憶體實作 ------------ */
pub type RoomMap = Arc<RwLock<HashMap<String, RoomRecord>>>;

#[derive(Clone, Default)]
pub struct InMemoryRooms {
    rooms: RoomMap,
}

impl InMemoryRooms {
    pub fn new() -> Self { Self::default() }

    pub async fn create(&self, name: &str, creator_id: &str) -> RoomRecord {
        let room = RoomRecord::new(nanoid::nanoid!(10), name, creator_id);
        self.insert(room.clone()).await;
        room
    }

    pub async fn insert(&self, room: RoomRecord) {
        self.rooms.write().await.insert(room.id.clone(), room);
    }

    pub async fn get(&self, room_id: &str) -> Option<RoomRecord> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn close(&self, room_id: &str) -> Result<RoomRecord, StoreErr> {
        self.update(room_id, |r| r.status = RoomStatus::Closed).await
    }

    pub async fn destroy(&self, room_id: &str) -> Option<RoomRecord> {
        self.rooms.write().await.remove(room_id)
    }

    /// Adds or renames a roster entry.
    pub async fn add_member(&self, room_id: &str, member: Participant) -> Result<RoomRecord, StoreErr> {
        self.update(room_id, move |r| {
            match r.participants.iter_mut().find(|p| p.id == member.id) {
                Some(p) => *p = member,
                None    => r.participants.push(member),
            }
        })
        .await
    }

    pub async fn remove_member(&self, room_id: &str, participant_id: &str) -> Result<RoomRecord, StoreErr> {
        self.update(room_id, |r| r.participants.retain(|p| p.id != participant_id)).await
    }

    async fn update<F>(&self, room_id: &str, f: F) -> Result<RoomRecord, StoreErr>
    where
        F: FnOnce(&mut RoomRecord),
    {
        let mut m = self.rooms.write().await;
        let room = m.get_mut(room_id).ok_or_else(|| StoreErr::NotFound(room_id.to_string()))?;
        f(room);
        Ok(room.clone())
    }
}

#[async_trait]
impl RoomStore for InMemoryRooms {
    async fn find(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreErr> {
        Ok(self.get(room_id).await)
    }

    async fn save(&self, room: &RoomRecord) -> Result<(), StoreErr> {
        let mut m = self.rooms.write().await;
        // a room destroyed or closed mid-command stays that way
        let slot = m.get_mut(&room.id).ok_or_else(|| StoreErr::NotFound(room.id.clone()))?;
        if slot.is_closed() {
            return Err(StoreErr::Closed(room.id.clone()));
        }
        slot.status = room.status;
        slot.video = room.video.clone();
        Ok(())
    }

    async fn participants(&self, room_id: &str) -> Result<Vec<Participant>, StoreErr> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.participants.clone())
            .ok_or_else(|| StoreErr::NotFound(room_id.to_string()))
    }
}
