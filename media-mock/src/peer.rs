use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use core_types::{
    MediaTrack, PeerConnection, PeerConnector, PeerEvent, PeerEventSender, PeerOptions,
    RemoteTrack, SdpKind, SessionDescription, TrackKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const STREAM_ID: &str = "consultation";

/// ダミー PeerConnection の挙動設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockPeerConfig {
    /// PeerConnection の生成自体を失敗させる
    pub fail_create: bool,
    /// Offer/Answer の生成・適用を失敗させる
    pub fail_negotiation: bool,
    /// close を失敗させる（後始末の継続確認用）
    pub fail_close: bool,
    /// SDP 交換が終わっても相手のトラックも Connected も通知しない
    pub hold_connection: bool,
    /// この種別の replace_track だけを失敗させる
    pub fail_replace: Option<TrackKind>,
}

/// SDP 文字列だけをやり取りするループバック PeerConnector
///
/// 本物の ICE/DTLS は行わず、SDP 交換が済んだ時点で相手のトラックと
/// Connected を通知する。
pub struct LoopbackPeerConnector {
    config: Mutex<MockPeerConfig>,
    next_session: AtomicU64,
    connections: Mutex<Vec<Arc<MockPeerConnection>>>,
}

impl LoopbackPeerConnector {
    pub fn new(config: MockPeerConfig) -> Self {
        Self {
            config: Mutex::new(config),
            next_session: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn set_config(&self, config: MockPeerConfig) {
        match self.config.lock() {
            Ok(mut slot) => *slot = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    /// これまでに生成した PeerConnection（生成順）
    pub fn connections(&self) -> Vec<Arc<MockPeerConnection>> {
        match self.connections.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_connection(&self) -> Option<Arc<MockPeerConnection>> {
        self.connections().last().cloned()
    }

    fn current_config(&self) -> MockPeerConfig {
        match self.config.lock() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for LoopbackPeerConnector {
    fn default() -> Self {
        Self::new(MockPeerConfig::default())
    }
}

#[async_trait]
impl PeerConnector for LoopbackPeerConnector {
    async fn create(
        &self,
        options: PeerOptions,
        tracks: Vec<Arc<MediaTrack>>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let config = self.current_config();
        if config.fail_create {
            bail!("mock peer connection creation failed");
        }

        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        info!(
            "Mock PeerConnection {} created (initiator: {}, {} tracks)",
            session_id,
            options.initiator,
            tracks.len()
        );
        let pc = Arc::new(MockPeerConnection {
            session_id,
            options,
            config: config.clone(),
            senders: Mutex::new(tracks),
            replaced: Mutex::new(Vec::new()),
            fail_replace: Mutex::new(config.fail_replace),
            events,
            closed: AtomicBool::new(false),
        });
        match self.connections.lock() {
            Ok(mut list) => list.push(pc.clone()),
            Err(poisoned) => poisoned.into_inner().push(pc.clone()),
        }
        Ok(pc)
    }
}

pub struct MockPeerConnection {
    session_id: u64,
    options: PeerOptions,
    config: MockPeerConfig,
    senders: Mutex<Vec<Arc<MediaTrack>>>,
    replaced: Mutex<Vec<String>>,
    fail_replace: Mutex<Option<TrackKind>>,
    events: PeerEventSender,
    closed: AtomicBool,
}

impl MockPeerConnection {
    pub fn is_initiator(&self) -> bool {
        self.options.initiator
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 現在送出中のトラックID
    pub fn sending_track_ids(&self) -> Vec<String> {
        self.with_senders(|senders| senders.iter().map(|t| t.id().to_string()).collect())
    }

    /// replace_track で差し込まれたトラックID（呼び出し順）
    pub fn replaced_track_ids(&self) -> Vec<String> {
        match self.replaced.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 生成後に replace_track の失敗種別を切り替える
    pub fn set_fail_replace(&self, kind: Option<TrackKind>) {
        match self.fail_replace.lock() {
            Ok(mut slot) => *slot = kind,
            Err(poisoned) => *poisoned.into_inner() = kind,
        }
    }

    /// 接続断などを外から起こす
    pub fn emit(&self, event: PeerEvent) {
        debug!("Mock PeerConnection {} emits {:?}", self.session_id, event);
        let _ = self.events.send(event);
    }

    fn with_senders<T>(&self, f: impl FnOnce(&mut Vec<Arc<MediaTrack>>) -> T) -> T {
        match self.senders.lock() {
            Ok(mut senders) => f(&mut senders),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn local_sdp(&self) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.session_id
        );
        self.with_senders(|senders| {
            for track in senders.iter() {
                let (media, payload_type) = match track.kind() {
                    TrackKind::Audio => ("audio", 111),
                    TrackKind::Video => ("video", 96),
                };
                sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF {}\r\n", media, payload_type));
                sdp.push_str(&format!("a=msid:{} {}\r\n", STREAM_ID, track.id()));
            }
        });
        sdp.push_str("a=end-of-candidates\r\n");
        sdp
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            bail!("peer connection {} is closed", self.session_id);
        }
        Ok(())
    }

    fn ensure_negotiable(&self, step: &str) -> Result<()> {
        self.ensure_open()?;
        if self.config.fail_negotiation {
            bail!("mock {} failed", step);
        }
        Ok(())
    }

    /// 相手のSDPに載っているトラックを通知し、接続完了とする
    fn complete(&self, remote: &SessionDescription) -> Result<()> {
        let tracks = parse_remote_tracks(&remote.sdp)?;
        if self.config.hold_connection {
            debug!("Mock PeerConnection {} holding connection", self.session_id);
            return Ok(());
        }
        for track in tracks {
            self.emit(PeerEvent::RemoteTrack(track));
        }
        self.emit(PeerEvent::Connected);
        Ok(())
    }
}

/// `m=` 行と `a=msid:` 行から相手のトラックを取り出す
fn parse_remote_tracks(sdp: &str) -> Result<Vec<RemoteTrack>> {
    if !sdp.starts_with("v=0") {
        bail!("malformed session description");
    }

    let mut tracks = Vec::new();
    let mut kind = None;
    for line in sdp.lines() {
        if let Some(media) = line.strip_prefix("m=") {
            kind = match media.split_whitespace().next() {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            };
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let id = msid
                .split_whitespace()
                .nth(1)
                .context("msid line without track id")?;
            if let Some(kind) = kind {
                tracks.push(RemoteTrack {
                    id: id.to_string(),
                    kind,
                });
            }
        }
    }
    Ok(tracks)
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_negotiable("create offer")?;
        let offer = SessionDescription::offer(self.local_sdp());
        info!("Mock offer created by {}", self.session_id);
        Ok(offer)
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.ensure_negotiable("accept offer")?;
        if offer.kind != SdpKind::Offer {
            bail!("expected an offer, got {:?}", offer.kind);
        }
        let answer = SessionDescription::answer(self.local_sdp());
        self.complete(&offer)?;
        info!("Mock answer created by {}", self.session_id);
        Ok(answer)
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        self.ensure_negotiable("accept answer")?;
        if answer.kind != SdpKind::Answer {
            bail!("expected an answer, got {:?}", answer.kind);
        }
        self.complete(&answer)?;
        info!("Mock answer applied by {}", self.session_id);
        Ok(())
    }

    async fn replace_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.ensure_open()?;
        let fail_kind = match self.fail_replace.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if fail_kind == Some(track.kind()) {
            bail!("mock {:?} track replacement failed", track.kind());
        }
        let previous = self.with_senders(|senders| {
            senders
                .iter_mut()
                .find(|t| t.kind() == track.kind())
                .map(|slot| std::mem::replace(slot, track.clone()))
        });
        let previous = previous
            .with_context(|| format!("no outgoing {:?} track to replace", track.kind()))?;
        info!(
            "Mock PeerConnection {} replaced {} -> {}",
            self.session_id,
            previous.id(),
            track.id()
        );

        match self.replaced.lock() {
            Ok(mut list) => list.push(track.id().to_string()),
            Err(poisoned) => poisoned.into_inner().push(track.id().to_string()),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.config.fail_close {
            warn!("Mock PeerConnection {} failing close", self.session_id);
            bail!("mock close failure");
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.with_senders(|senders| senders.clear());
        info!("Mock PeerConnection {} closed", self.session_id);
        self.emit(PeerEvent::Closed);
        Ok(())
    }
}
