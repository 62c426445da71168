//! JSON frames exchanged over the sync socket.
//!
//! ```text
//! client → server   {"event":"sync:seek","ack":7,"data":{"roomId":..,"operatorId":..,"progress":12.5}}
//! server → client   {"event":"ack","data":{"id":7,"ok":true,"data":{..}}}
//!                   {"event":"sync:event","data":{..}}
//!                   {"event":"member:joined"|"member:left","data":{..}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{AckError, SyncErr, SyncResult},
    event::{MemberEvent, SyncEvent},
    video,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub ack:   Option<u64>,
    #[serde(default)]
    pub data:  Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "ack")]
    Ack(AckFrame),
    #[serde(rename = "sync:event")]
    Sync(SyncEvent),
    #[serde(rename = "member:joined")]
    MemberJoined(MemberEvent),
    #[serde(rename = "member:left")]
    MemberLeft(MemberEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    #[serde(default)]
    pub id:  Option<u64>,
    #[serde(flatten)]
    pub ack: Ack,
}

/// Acknowledgement envelope: `{ok, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok:    bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data:  Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl Ack {
    pub fn ok(data: Value) -> Self { Self { ok: true, data: Some(data), error: None } }

    pub fn err(e: &SyncErr) -> Self { Self { ok: false, data: None, error: Some(e.to_ack_error()) } }

    pub fn from_result(r: SyncResult<Value>) -> Self {
        match r {
            Ok(v)  => Ack::ok(v),
            Err(e) => Ack::err(&e),
        }
    }
}

/* ------------ 指令 ------------ */

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join           { room_id: String, participant_id: String, nickname: Option<String> },
    Leave          { room_id: String, participant_id: String },
    Init           { room_id: String },
    Play           { room_id: String, operator_id: String },
    Pause          { room_id: String, operator_id: String },
    Seek           { room_id: String, operator_id: String, progress: f64 },
    ChangeRate     { room_id: String, operator_id: String, rate: f64 },
    ChangeSubtitle { room_id: String, operator_id: String, subtitle: Option<String> },
    ChangeSource   { room_id: String, operator_id: String, source_url: Option<String> },
}

impl Command {
    /// Shape and range checks only; nothing here touches room state.
    pub fn parse(event: &str, data: &Value) -> SyncResult<Self> {
        let empty = Map::new();
        let d = data.as_object().unwrap_or(&empty);

        let cmd = match event {
            "sync:join" => Command::Join {
                room_id:        id(d, "roomId")?,
                participant_id: id(d, "participantId")?,
                nickname:       opt_str(d, "nickname")?,
            },
            "sync:leave" => Command::Leave {
                room_id:        id(d, "roomId")?,
                participant_id: id(d, "participantId")?,
            },
            "sync:init" => Command::Init { room_id: id(d, "roomId")? },
            "sync:play" => Command::Play { room_id: id(d, "roomId")?, operator_id: id(d, "operatorId")? },
            "sync:pause" => Command::Pause { room_id: id(d, "roomId")?, operator_id: id(d, "operatorId")? },
            "sync:seek" => {
                let (room_id, operator_id) = (id(d, "roomId")?, id(d, "operatorId")?);
                let progress = number(d, "progress")?;
                if !video::valid_progress(progress) {
                    return Err(SyncErr::validation("progress must be a non-negative number"));
                }
                Command::Seek { room_id, operator_id, progress }
            }
            "sync:changeRate" => {
                let (room_id, operator_id) = (id(d, "roomId")?, id(d, "operatorId")?);
                let rate = number(d, "rate")?;
                if !video::valid_rate(rate) {
                    return Err(SyncErr::validation("rate must be within (0, 4]"));
                }
                Command::ChangeRate { room_id, operator_id, rate }
            }
            "sync:changeSubtitle" => Command::ChangeSubtitle {
                room_id:     id(d, "roomId")?,
                operator_id: id(d, "operatorId")?,
                subtitle:    opt_str(d, "subtitle")?,
            },
            "sync:changeSource" => Command::ChangeSource {
                room_id:     id(d, "roomId")?,
                operator_id: id(d, "operatorId")?,
                source_url:  opt_str(d, "sourceUrl")?,
            },
            other => return Err(SyncErr::validation(format!("unknown command {other}"))),
        };
        Ok(cmd)
    }
}

fn id(d: &Map<String, Value>, key: &str) -> SyncResult<String> {
    match d.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(SyncErr::validation(format!("{key} must be a non-empty string"))),
    }
}

fn number(d: &Map<String, Value>, key: &str) -> SyncResult<f64> {
    d.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| SyncErr::validation(format!("{key} must be a number")))
}

fn opt_str(d: &Map<String, Value>, key: &str) -> SyncResult<Option<String>> {
    match d.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s))   => Ok(Some(s.clone())),
        Some(_) => Err(SyncErr::validation(format!("{key} must be a string or null"))),
    }
}
