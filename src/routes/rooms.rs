//! Minimal room lifecycle endpoints over the in-memory store. Room ownership
//! lives outside the sync core; these exist so the server is usable on its own.
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::{
    clock,
    error::{bad, AppErr, AppResult},
    event::Participant,
    registry::ANONYMOUS,
    room::{InMemoryRooms, RoomDetail},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoom {
    name:       String,
    creator_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMember {
    participant_id: String,
    nickname:       Option<String>,
    role:           Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/rooms", post(create))
        .route("/rooms/:id", get(detail))
        .route("/rooms/:id/close", post(close))
        .route("/rooms/:id/members", post(add_member))
        .route("/rooms/:id/members/:pid", delete(remove_member))
}

async fn create(
    Extension(rooms): Extension<Arc<InMemoryRooms>>,
    Json(p): Json<CreateRoom>,
) -> AppResult<impl IntoResponse> {
    if p.creator_id.trim().is_empty() {
        return Err(bad("creatorId must not be empty"));
    }
    let room = rooms.create(p.name.trim(), &p.creator_id).await;
    info!(room = %room.id, creator = %room.creator_id, "room created");
    Ok((StatusCode::CREATED, Json(room.detail(clock::now_ms()))))
}

async fn detail(
    Extension(rooms): Extension<Arc<InMemoryRooms>>,
    Path(id): Path<String>,
) -> AppResult<Json<RoomDetail>> {
    let room = rooms.get(&id).await.ok_or_else(|| AppErr::NotFound(format!("room {id}")))?;
    Ok(Json(room.detail(clock::now_ms())))
}

async fn close(
    Extension(rooms): Extension<Arc<InMemoryRooms>>,
    Path(id): Path<String>,
) -> AppResult<Json<RoomDetail>> {
    let room = rooms.close(&id).await?;
    info!(room = %id, "room closed");
    Ok(Json(room.detail(clock::now_ms())))
}

async fn add_member(
    Extension(rooms): Extension<Arc<InMemoryRooms>>,
    Path(id): Path<String>,
    Json(p): Json<AddMember>,
) -> AppResult<Json<Value>> {
    if p.participant_id.trim().is_empty() {
        return Err(bad("participantId must not be empty"));
    }
    let nickname = p.nickname.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| ANONYMOUS.into());
    let member = Participant { role: p.role, ..Participant::new(p.participant_id, nickname) };
    let room = rooms.add_member(&id, member).await?;
    Ok(Json(json!({ "participants": room.participants })))
}

async fn remove_member(
    Extension(rooms): Extension<Arc<InMemoryRooms>>,
    Path((id, pid)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let room = rooms.remove_member(&id, &pid).await?;
    Ok(Json(json!({ "participants": room.participants })))
}
