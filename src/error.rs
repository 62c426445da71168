use axum::{http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;
pub type SyncResult<T> = Result<T, SyncErr>;

/* ------------ REST / 啟動錯誤 ------------ */
#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            AppErr::Bad(msg)      => (StatusCode::BAD_REQUEST, msg),
            AppErr::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (code, body).into_response()
    }
}

impl From<StoreErr> for AppErr {
    fn from(e: StoreErr) -> Self {
        match e {
            StoreErr::NotFound(id) => AppErr::NotFound(format!("room {id}")),
            StoreErr::Closed(id)   => AppErr::Bad(format!("room {id} is closed")),
            other                  => AppErr::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }

/* ------------ 房間儲存 (外部協作者) ------------ */
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreErr {
    #[error("room {0} does not exist")]
    NotFound(String),

    #[error("room {0} was closed")]
    Closed(String),

    #[error("room store unavailable: {0}")]
    Unavailable(String),
}

/* ------------ 同步指令錯誤 ------------ */
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SyncErr {
    #[error("{0}")]
    Validation(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is closed")]
    RoomClosed(String),

    #[error("only the room creator may {0}")]
    PermissionDenied(String),

    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    #[error(transparent)]
    Store(StoreErr),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreErr> for SyncErr {
    fn from(e: StoreErr) -> Self {
        match e {
            StoreErr::Closed(id) => SyncErr::RoomClosed(id),
            other                => SyncErr::Store(other),
        }
    }
}

impl SyncErr {
    pub fn validation(msg: impl Into<String>) -> Self { SyncErr::Validation(msg.into()) }

    /// Wire code carried by the acknowledgement envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SyncErr::Validation(_)       => "VALIDATION_ERROR",
            SyncErr::RoomNotFound(_)     => "ROOM_NOT_FOUND",
            SyncErr::RoomClosed(_)       => "ROOM_CLOSED",
            SyncErr::PermissionDenied(_) => "PERMISSION_DENIED",
            SyncErr::InvalidEventType(_)
            | SyncErr::Store(_)
            | SyncErr::Internal(_)       => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Internal failures get logged here and never leak detail to the caller.
    pub fn to_ack_error(&self) -> AckError {
        let message = match self.code() {
            "INTERNAL_SERVER_ERROR" => {
                tracing::error!(error = %self, "sync command failed");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        AckError { code: self.code().to_string(), message }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct AckError {
    pub code:    String,
    pub message: String,
}

impl Display for AckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
