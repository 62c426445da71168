use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, Extension},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{gateway::SyncGateway, protocol::ServerFrame};

pub fn router() -> Router {
    Router::new().route("/sync", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(gateway): Extension<Arc<SyncGateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |s| session(s, gateway))
}

/* ---------------- per connection ---------------- */
async fn session(sock: WebSocket, gateway: Arc<SyncGateway>) {
    let (mut sink, mut stream) = sock.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let conn = gateway.connect(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t)  => t,
                Err(e) => { warn!(error = %e, "unserializable frame dropped"); continue; }
            };
            if sink.send(Message::Text(text)).await.is_err() { break; }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(raw) => gateway.handle_text(conn, &raw).await,
            Message::Close(_)  => break,
            _ => {}
        }
    }

    /* 斷線 */
    debug!(%conn, "socket closed");
    gateway.disconnect(conn).await;
    writer.abort();
}
