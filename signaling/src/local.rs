use anyhow::Result;
use async_trait::async_trait;
use core_types::{ClientMessage, SignalingConnector, SignalingEvent, SignalingLink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::coordinator::Coordinator;

/// 同一プロセス内のコーディネーターへ直接つなぐコネクタ
///
/// ソケットを使わずに WebSocket 接続と同じ順序保証・切断時の leave を再現する。
#[derive(Clone)]
pub struct LocalSignalingConnector {
    coordinator: Arc<Coordinator>,
}

impl LocalSignalingConnector {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl SignalingConnector for LocalSignalingConnector {
    async fn connect(&self) -> Result<SignalingLink> {
        let (handle, mut outbox) = self.coordinator.register();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalingEvent>();

        let coordinator = self.coordinator.clone();
        let reader_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                coordinator.handle_message(&reader_handle, msg);
            }
            debug!("Local link {} closed by client", reader_handle);
            coordinator.disconnect(&reader_handle);
        });

        tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                if inbound_tx.send(SignalingEvent::Message(msg)).is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(SignalingEvent::Closed { reason: None });
        });

        debug!("Local link established: {}", handle);
        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
