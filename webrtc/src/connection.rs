use anyhow::{Context, Result};
use async_trait::async_trait;
use core_types::{
    MediaTrack, PeerConnection, PeerConnector, PeerEvent, PeerEventSender, PeerOptions,
    RemoteTrack, SessionDescription, TrackKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use webrtc_rs::api::interceptor_registry::register_default_interceptors;
use webrtc_rs::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc_rs::api::setting_engine::SettingEngine;
use webrtc_rs::api::{APIBuilder, API};
use webrtc_rs::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc_rs::ice_transport::ice_server::RTCIceServer;
use webrtc_rs::interceptor::registry::Registry;
use webrtc_rs::peer_connection::configuration::RTCConfiguration;
use webrtc_rs::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc_rs::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc_rs::peer_connection::RTCPeerConnection;
use webrtc_rs::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc_rs::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc_rs::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc_rs::track::track_local::TrackLocal;

use crate::track_writer::OutgoingTrack;

const STREAM_ID: &str = "consultation";

/// ICEサーバー設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
    /// ループバック候補を含める（同一ホスト内接続用）
    pub include_loopback: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            include_loopback: false,
        }
    }
}

pub fn codec_to_mime_type(kind: TrackKind) -> String {
    match kind {
        TrackKind::Audio => MIME_TYPE_OPUS.to_owned(),
        TrackKind::Video => MIME_TYPE_VP8.to_owned(),
    }
}

fn new_sample_track(track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: codec_to_mime_type(track.kind()),
            ..Default::default()
        },
        track.id().to_string(),
        STREAM_ID.to_string(),
    ))
}

/// webrtc-rs を使う PeerConnector
pub struct RtcPeerConnector {
    config: PeerConfig,
}

impl RtcPeerConnector {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }

    fn build_api(&self) -> Result<API> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(self.config.include_loopback);

        Ok(APIBuilder::new()
            .with_media_engine(m)
            .with_setting_engine(setting_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    /// 具象型のまま PeerConnection を作る（サンプル書き込みを使う場合）
    pub async fn create_connection(
        &self,
        options: PeerOptions,
        tracks: Vec<Arc<MediaTrack>>,
        events: PeerEventSender,
    ) -> Result<Arc<RtcPeerConnection>> {
        let api = self.build_api()?;
        let config = RTCConfiguration {
            ice_servers: self
                .config
                .ice_servers
                .iter()
                .cloned()
                .map(RTCIceServer::from)
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .context("Failed to create peer connection")?,
        );
        info!("PeerConnection created (initiator: {})", options.initiator);

        let mut outgoing = HashMap::new();
        for track in tracks {
            let sample_track = new_sample_track(&track);
            let sender: Arc<RTCRtpSender> = pc
                .add_track(sample_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .with_context(|| format!("Failed to add {:?} track", track.kind()))?;
            drain_rtcp(sender.clone());
            info!("{:?} track {} added to peer connection", track.kind(), track.id());
            outgoing.insert(
                track.kind(),
                OutgoingTrack {
                    source: track,
                    sample_track,
                    sender,
                },
            );
        }

        watch_connection_state(&pc, events.clone());
        watch_remote_tracks(&pc, events);

        Ok(Arc::new(RtcPeerConnection {
            pc,
            outgoing: Mutex::new(outgoing),
        }))
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn create(
        &self,
        options: PeerOptions,
        tracks: Vec<Arc<MediaTrack>>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = self.create_connection(options, tracks, events).await?;
        Ok(pc)
    }
}

// RTCP を読み捨てる（NACK 等をインターセプタに処理させるため）
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
    });
}

fn watch_connection_state(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            let event = match state {
                RTCPeerConnectionState::Connected => {
                    info!("PeerConnection state: Connected");
                    Some(PeerEvent::Connected)
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!("PeerConnection state: Disconnected - Connection lost");
                    Some(PeerEvent::Disconnected)
                }
                RTCPeerConnectionState::Failed => {
                    error!("PeerConnection state: Failed - Connection failed");
                    Some(PeerEvent::Failed("peer connection failed".to_string()))
                }
                RTCPeerConnectionState::Closed => {
                    info!("PeerConnection state: Closed");
                    Some(PeerEvent::Closed)
                }
                other => {
                    debug!("PeerConnection state: {}", other);
                    None
                }
            };
            if let Some(event) = event {
                let _ = events.send(event);
            }
        })
    }));

    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        Box::pin(async move {
            debug!("ICE connection state: {}", state);
        })
    }));
}

fn watch_remote_tracks(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let events = events.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                RTPCodecType::Unspecified => {
                    debug!("Ignoring remote track of unspecified kind");
                    return;
                }
            };
            info!("Track received: {}", kind_label(kind));
            let _ = events.send(PeerEvent::RemoteTrack(RemoteTrack {
                id: track.id(),
                kind,
            }));
        })
    }));
}

fn kind_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

/// webrtc-rs の RTCPeerConnection ラッパー
pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    outgoing: Mutex<HashMap<TrackKind, OutgoingTrack>>,
}

impl RtcPeerConnection {
    /// ICE収集完了を待ってからローカルSDPを返す
    async fn set_local_and_gather(&self, desc: RTCSessionDescription) -> Result<String> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(desc)
            .await
            .context("Failed to set local description")?;
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .context("Local description missing after ICE gathering")?;
        Ok(local.sdp)
    }

    /// エンコード済みサンプルを送出する（メディアパイプライン用）
    pub async fn write_sample(
        &self,
        kind: TrackKind,
        data: bytes::Bytes,
        duration: std::time::Duration,
    ) -> Result<bool> {
        let outgoing = self.outgoing.lock().await;
        match outgoing.get(&kind) {
            Some(track) => track.write(data, duration).await,
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("Failed to create offer")?;
        let sdp = self.set_local_and_gather(offer).await?;
        info!("Offer SDP generated ({} bytes)", sdp.len());
        Ok(SessionDescription::offer(sdp))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let offer = RTCSessionDescription::offer(offer.sdp).context("Failed to parse offer SDP")?;
        self.pc
            .set_remote_description(offer)
            .await
            .context("Failed to set remote description")?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .context("Failed to create answer")?;
        let sdp = self.set_local_and_gather(answer).await?;
        info!("Answer SDP generated ({} bytes)", sdp.len());
        Ok(SessionDescription::answer(sdp))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        let answer =
            RTCSessionDescription::answer(answer.sdp).context("Failed to parse answer SDP")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("Failed to set remote description")?;
        info!("Remote answer applied");
        Ok(())
    }

    async fn replace_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        let mut outgoing = self.outgoing.lock().await;
        let current = outgoing
            .get_mut(&track.kind())
            .with_context(|| format!("No outgoing {} track to replace", kind_label(track.kind())))?;

        let sample_track = new_sample_track(&track);
        current
            .sender
            .replace_track(Some(sample_track.clone() as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .context("Failed to replace track")?;

        info!(
            "{} track replaced: {} -> {}",
            kind_label(track.kind()),
            current.source.id(),
            track.id()
        );
        current.source = track;
        current.sample_track = sample_track;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .context("Failed to close peer connection")?;
        info!("PeerConnection closed");
        Ok(())
    }
}
