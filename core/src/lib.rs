mod error;
mod media;
mod peer;
mod protocol;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use error::{CallError, MediaError, MediaErrorKind};
pub use media::{
    LocalStream, MediaConstraints, MediaDevices, MediaTrack, RemoteStream, RemoteTrack,
    TrackKind, TrackSource,
};
pub use peer::{PeerConnection, PeerConnector, PeerEvent, PeerEventSender, PeerOptions};
pub use protocol::{
    ChatMessage, ClientMessage, ConnectionHandle, ErrorCode, SdpKind, ServerMessage,
    SessionDescription,
};

/// シグナリング接続から届くイベント
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Message(ServerMessage),
    /// 接続が切れた（正常終了・異常終了どちらも）
    Closed { reason: Option<String> },
}

pub type SignalingOutbound = mpsc::UnboundedSender<ClientMessage>;
pub type SignalingInbound = mpsc::UnboundedReceiver<SignalingEvent>;

/// 確立済みのシグナリング接続
///
/// `outbound` をdropすると接続が閉じられる。
pub struct SignalingLink {
    pub outbound: SignalingOutbound,
    pub inbound: SignalingInbound,
}

/// シグナリング接続を確立するファクトリ
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<SignalingLink>;
}
