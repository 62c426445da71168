//! Immutable records of accepted commands and membership changes.
//!
//! Client contract for [`SyncEvent`]: once an event arrives, local playback is
//! re-anchored at `(payload.progress, serverTime)` and, while `payload.status`
//! is `playing`, extrapolated with `payload.playbackRate`. Clients must not
//! extrapolate from any earlier room anchor.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    clock,
    error::SyncErr,
    video::{PlayStatus, VideoState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventType {
    ChangeSource,
    Play,
    Pause,
    Seek,
    ChangeRate,
    ChangeSubtitle,
}

impl SyncEventType {
    pub const ALL: [SyncEventType; 6] = [
        SyncEventType::ChangeSource,
        SyncEventType::Play,
        SyncEventType::Pause,
        SyncEventType::Seek,
        SyncEventType::ChangeRate,
        SyncEventType::ChangeSubtitle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncEventType::ChangeSource   => "CHANGE_SOURCE",
            SyncEventType::Play           => "PLAY",
            SyncEventType::Pause          => "PAUSE",
            SyncEventType::Seek           => "SEEK",
            SyncEventType::ChangeRate     => "CHANGE_RATE",
            SyncEventType::ChangeSubtitle => "CHANGE_SUBTITLE",
        }
    }
}

impl fmt::Display for SyncEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SyncEventType {
    type Err = SyncErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncErr::InvalidEventType(s.to_string()))
    }
}

/// Snapshot of the room's playback state right after the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub source:        Option<String>,
    pub status:        PlayStatus,
    pub progress:      f64,
    pub playback_rate: f64,
    pub subtitle:      Option<String>,
}

impl SyncPayload {
    /// `progress` is passed in because each command decides which position it
    /// advertises (frozen, sought or extrapolated).
    pub fn capture(video: &VideoState, progress: f64) -> Self {
        Self {
            source:        video.source.clone(),
            status:        video.status,
            progress,
            playback_rate: video.playback_rate,
            subtitle:      video.subtitle.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(rename = "type")]
    kind:        SyncEventType,
    room_id:     String,
    operator_id: String,
    server_time: i64,
    payload:     SyncPayload,
}

impl SyncEvent {
    pub fn at(
        kind: SyncEventType,
        room_id: &str,
        operator_id: &str,
        server_time: i64,
        payload: SyncPayload,
    ) -> Self {
        Self {
            kind,
            room_id: room_id.to_string(),
            operator_id: operator_id.to_string(),
            server_time,
            payload,
        }
    }

    /// Build from a wire type name; unknown names are rejected.
    pub fn named(
        kind: &str,
        room_id: &str,
        operator_id: &str,
        server_time: Option<i64>,
        payload: SyncPayload,
    ) -> Result<Self, SyncErr> {
        let kind = kind.parse::<SyncEventType>()?;
        let at = server_time.unwrap_or_else(clock::now_ms);
        Ok(Self::at(kind, room_id, operator_id, at, payload))
    }

    pub fn kind(&self) -> SyncEventType { self.kind }
    pub fn room_id(&self) -> &str { &self.room_id }
    pub fn operator_id(&self) -> &str { &self.operator_id }
    pub fn server_time(&self) -> i64 { self.server_time }
    pub fn payload(&self) -> &SyncPayload { &self.payload }
}

/* ------------ 成員 ------------ */

/// Roster entry as reported by the room collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id:       String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role:     Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status:   Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self { id: id.into(), nickname: nickname.into(), role: None, status: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRef {
    pub id:       String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub room_id:      String,
    pub participant:  MemberRef,
    pub participants: Vec<Participant>,
    pub timestamp:    i64,
}

impl MemberEvent {
    pub fn new(room_id: &str, id: &str, nickname: &str, participants: Vec<Participant>) -> Self {
        Self {
            room_id: room_id.to_string(),
            participant: MemberRef { id: id.to_string(), nickname: nickname.to_string() },
            participants,
            timestamp: clock::now_ms(),
        }
    }
}
