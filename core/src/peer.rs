use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::{MediaTrack, RemoteTrack};
use crate::protocol::SessionDescription;

/// PeerConnection 側から通知される状態変化
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// 直接の経路が確立した
    Connected,
    /// 相手のトラックが届いた
    RemoteTrack(RemoteTrack),
    Disconnected,
    Closed,
    /// ネゴシエーション・接続の回復不能な失敗
    Failed(String),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerOptions {
    pub initiator: bool,
}

/// 1通話につき1つの PeerConnection
///
/// SDP はすべて ICE 収集完了後のものを返す（trickle しない）。
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    /// Offer を適用して Answer を返す
    async fn accept_offer(&self, offer: SessionDescription) -> anyhow::Result<SessionDescription>;

    async fn accept_answer(&self, answer: SessionDescription) -> anyhow::Result<()>;

    /// 同じ種別の送信トラックを再ネゴシエーションなしで差し替える
    async fn replace_track(&self, track: Arc<MediaTrack>) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        options: PeerOptions,
        tracks: Vec<Arc<MediaTrack>>,
        events: PeerEventSender,
    ) -> anyhow::Result<Arc<dyn PeerConnection>>;
}
