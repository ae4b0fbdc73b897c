use anyhow::{Context, Result};
use async_trait::async_trait;
use core_types::{
    ClientMessage, ServerMessage, SignalingConnector, SignalingEvent, SignalingLink,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use url::Url;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// WebSocket経由でコーディネーターに接続するクライアント
///
/// 再試行は最初の接続確立時のみ。確立後に切れた場合は `SignalingEvent::Closed`
/// を通知するだけで再接続はしない。
#[derive(Debug, Clone)]
pub struct WsSignalingConnector {
    url: String,
    max_attempts: u32,
}

impl WsSignalingConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_attempts: 3,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    async fn connect_once(url: &Url) -> Result<SignalingLink> {
        info!("Connecting to WebSocket: {}", url);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to WebSocket")?;
        info!("WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalingEvent>();

        // セッションからの送信をWebSocketへ書き出すタスク
        // outbound がすべて drop されたら Close を送って終了する
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize signaling message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                    error!("Failed to send message to WebSocket: {}", e);
                    break;
                }
            }
            debug!("Outbound channel closed, closing WebSocket");
            let _ = write.send(WsMessage::Close(None)).await;
        });

        // WebSocketからの受信をセッションへ転送するタスク
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        debug!("Received message: {}", text);
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(parsed) => {
                                if inbound_tx.send(SignalingEvent::Message(parsed)).is_err() {
                                    debug!("Inbound receiver dropped");
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("Failed to parse message: {}", e);
                            }
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        info!("WebSocket closed by server");
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    Ok(_) => {
                        debug!("Received non-text message");
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(SignalingEvent::Closed { reason });
        });

        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[async_trait]
impl SignalingConnector for WsSignalingConnector {
    async fn connect(&self) -> Result<SignalingLink> {
        let url = Url::parse(&self.url).context("Failed to parse signaling url")?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect_once(&url).await {
                Ok(link) => return Ok(link),
                Err(e) if attempt < self.max_attempts => {
                    // Exponential backoff
                    let backoff = INITIAL_BACKOFF
                        .mul_f64(2_f64.powi(attempt as i32 - 1))
                        .min(MAX_BACKOFF);
                    warn!(
                        "Signaling connect failed: {:#}. Retrying in {:?} (attempt {}/{})",
                        e, backoff, attempt, self.max_attempts
                    );
                    sleep(backoff).await;
                }
                Err(e) => {
                    error!("Max retries reached, giving up");
                    return Err(e);
                }
            }
        }
    }
}
