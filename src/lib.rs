//! Room-scoped playback synchronization server.
//!
//! One privileged participant per room drives play/pause/seek/rate/subtitle/
//! source changes; every other connection in the room is steered to match
//! using server timestamps as the shared clock.

pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod routes;
pub mod state;
pub mod sync;
pub mod video;

use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir};

use crate::{config::Config, gateway::SyncGateway, room::InMemoryRooms};

/// Composition root shared by the binary and the integration tests.
pub fn app(cfg: &Config, rooms: Arc<InMemoryRooms>) -> (Router, Arc<SyncGateway>) {
    let gateway = Arc::new(SyncGateway::new(rooms.clone(), cfg.roster_timeout));
    let router = Router::new()
        .merge(routes::router())
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(Extension(gateway.clone()))
        .layer(Extension(rooms))
        .layer(RequestBodyLimitLayer::new(cfg.body_limit));
    (router, gateway)
}
