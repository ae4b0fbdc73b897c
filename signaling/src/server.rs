use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use core_types::{ClientMessage, ErrorCode};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::coordinator::{Coordinator, RoomSnapshot};

/// コーディネーターのHTTP/WebSocketルーター
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/rooms", get(list_rooms))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

/// リスナーが閉じるまでサーバーを実行する
pub async fn serve(listener: TcpListener, coordinator: Arc<Coordinator>) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!("Signaling coordinator listening on {}", addr);
    axum::serve(listener, router(coordinator))
        .await
        .context("Signaling server terminated")?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_rooms(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<RoomSnapshot>> {
    Json(coordinator.rooms())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(coordinator): State<Arc<Coordinator>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>) {
    let (handle, mut outbox) = coordinator.register();
    info!("WebSocket connected: {}", handle);

    let (mut write, mut read) = socket.split();

    // この接続宛てのメッセージを順にソケットへ書き出すタスク
    let write_handle = handle.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message for {}: {}", write_handle, e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(json)).await {
                debug!("Failed to write to {}: {}", write_handle, e);
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    debug!("Received from {}: {:?}", handle, msg);
                    coordinator.handle_message(&handle, msg);
                }
                Err(e) => {
                    warn!("Malformed message from {}: {}", handle, e);
                    coordinator.send_error(&handle, ErrorCode::BadMessage, e.to_string());
                }
            },
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client: {}", handle);
                break;
            }
            Ok(_) => {
                debug!("Ignoring non-text frame from {}", handle);
            }
            Err(e) => {
                warn!("WebSocket error on {}: {}", handle, e);
                break;
            }
        }
    }

    // leave と登録解除。outbox の送信側がすべて消えると書き込みタスクも終わる
    coordinator.disconnect(&handle);
    if let Err(e) = writer.await {
        error!("Writer task for {} panicked: {}", handle, e);
    }
    info!("WebSocket disconnected: {}", handle);
}
