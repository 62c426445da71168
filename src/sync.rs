//! Command processor: authorization, validation and state transitions for
//! every playback command, one instance for all rooms.
//!
//! Commands on one room are serialized by a per-room async mutex held across
//! the whole find → check → mutate → save sequence. Rooms never contend with
//! each other.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

use crate::{
    clock,
    error::{SyncErr, SyncResult},
    event::{SyncEvent, SyncEventType, SyncPayload},
    room::{RoomDetail, RoomRecord, RoomStatus, RoomStore},
    video::{self, VideoSnapshot},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub room:  RoomDetail,
    pub event: SyncEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitState {
    pub video_state: VideoSnapshot,
    pub server_time: i64,
}

/* ------------ 每房間互斥鎖 ------------ */
type RoomLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct RoomLocks {
    inner: Mutex<HashMap<String, RoomLock>>,
}

impl RoomLocks {
    fn acquire_handle(&self, room_id: &str) -> RoomLock {
        let mut m = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        m.entry(room_id.to_string()).or_default().clone()
    }

    /// Drops the map entry once nobody else holds or waits on it. Clones are
    /// only made under the map mutex, so the count check cannot race.
    fn release_handle(&self, room_id: &str, handle: RoomLock) {
        let mut m = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(&handle) == 2 {
            m.remove(room_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct SyncService {
    rooms: Arc<dyn RoomStore>,
    locks: RoomLocks,
}

impl SyncService {
    pub fn new(rooms: Arc<dyn RoomStore>) -> Self {
        Self { rooms, locks: RoomLocks::default() }
    }

    pub async fn change_source(
        &self,
        room_id: &str,
        operator_id: &str,
        source: Option<String>,
    ) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::ChangeSource, |room, now| {
            room.video.set_source(source, now);
            Ok(room.video.current_progress(now))
        })
        .await
    }

    pub async fn play(&self, room_id: &str, operator_id: &str) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::Play, |room, now| {
            room.video.play(now);
            room.status = RoomStatus::Playing;
            Ok(room.video.current_progress(now))
        })
        .await
    }

    pub async fn pause(&self, room_id: &str, operator_id: &str) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::Pause, |room, now| {
            room.video.pause(now);
            Ok(room.video.progress)
        })
        .await
    }

    pub async fn seek(&self, room_id: &str, operator_id: &str, progress: f64) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::Seek, |room, now| {
            if !video::valid_progress(progress) {
                return Err(SyncErr::validation("progress must be a non-negative number"));
            }
            room.video.seek(progress, now);
            Ok(progress)
        })
        .await
    }

    pub async fn change_rate(&self, room_id: &str, operator_id: &str, rate: f64) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::ChangeRate, |room, now| {
            if !video::valid_rate(rate) {
                return Err(SyncErr::validation("rate must be within (0, 4]"));
            }
            room.video.set_rate(rate, now);
            Ok(room.video.current_progress(now))
        })
        .await
    }

    pub async fn change_subtitle(
        &self,
        room_id: &str,
        operator_id: &str,
        subtitle: Option<String>,
    ) -> SyncResult<CommandOutcome> {
        self.apply(room_id, operator_id, SyncEventType::ChangeSubtitle, |room, now| {
            room.video.set_subtitle(subtitle, now);
            Ok(room.video.current_progress(now))
        })
        .await
    }

    /// Current state plus a fresh timestamp for a newly joined client.
    pub async fn init_state(&self, room_id: &str) -> SyncResult<InitState> {
        let room = self.load(room_id).await?;
        let now = clock::now_ms();
        Ok(InitState { video_state: room.video.snapshot(now), server_time: now })
    }

    async fn load(&self, room_id: &str) -> SyncResult<RoomRecord> {
        self.rooms
            .find(room_id)
            .await?
            .ok_or_else(|| SyncErr::RoomNotFound(room_id.to_string()))
    }

    /// Shared skeleton of every state-changing command. `mutate` returns the
    /// progress the event advertises.
    async fn apply<F>(
        &self,
        room_id: &str,
        operator_id: &str,
        kind: SyncEventType,
        mutate: F,
    ) -> SyncResult<CommandOutcome>
    where
        F: FnOnce(&mut RoomRecord, i64) -> SyncResult<f64>,
    {
        let handle = self.locks.acquire_handle(room_id);
        let result = {
            let _guard = handle.lock().await;
            self.apply_locked(room_id, operator_id, kind, mutate).await
        };
        self.locks.release_handle(room_id, handle);

        if let Ok(out) = &result {
            info!(room = room_id, operator = operator_id, event = %kind,
                  progress = out.event.payload().progress, "sync command applied");
        }
        result
    }

    async fn apply_locked<F>(
        &self,
        room_id: &str,
        operator_id: &str,
        kind: SyncEventType,
        mutate: F,
    ) -> SyncResult<CommandOutcome>
    where
        F: FnOnce(&mut RoomRecord, i64) -> SyncResult<f64>,
    {
        let mut room = self.load(room_id).await?;
        if room.is_closed() {
            return Err(SyncErr::RoomClosed(room_id.to_string()));
        }
        if !room.is_creator(operator_id) {
            debug!(room = room_id, operator = operator_id, event = %kind, "rejected non-creator");
            return Err(SyncErr::PermissionDenied("control playback".into()));
        }

        let now = clock::now_ms();
        let progress = mutate(&mut room, now)?;
        self.rooms.save(&room).await?;

        let payload = SyncPayload::capture(&room.video, progress);
        let event = SyncEvent::at(kind, &room.id, operator_id, now, payload);
        Ok(CommandOutcome { room: room.detail(now), event })
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize { self.locks.len() }
}
