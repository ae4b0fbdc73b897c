use anyhow::Result;
use core_types::{
    CallError, ChatMessage, ClientMessage, ErrorCode, LocalStream, MediaConstraints,
    MediaDevices, PeerConnection, PeerConnector, PeerEvent, PeerEventSender, PeerOptions,
    RemoteStream, SdpKind, ServerMessage, SessionDescription, SignalingConnector,
    SignalingEvent, SignalingInbound, SignalingOutbound, TrackKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chat::ChatLog;
use crate::recording::RecordingSink;
use crate::state::{CallState, LocalMediaSummary, Role, SessionSnapshot};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// 1通話ぶんの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 予約ID（そのままルームIDになる）
    pub room_id: String,
    pub display_name: String,
    /// `None` ならネゴシエーションの打ち切りをしない
    pub negotiation_timeout: Option<Duration>,
    pub constraints: MediaConstraints,
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            negotiation_timeout: Some(DEFAULT_NEGOTIATION_TIMEOUT),
            constraints: MediaConstraints::default(),
        }
    }
}

type Reply = oneshot::Sender<Result<(), CallError>>;

enum Command {
    SetTrackEnabled {
        kind: TrackKind,
        enabled: bool,
        reply: Reply,
    },
    StartScreenShare {
        reply: Reply,
    },
    StopScreenShare {
        reply: Reply,
    },
    SendChat {
        text: String,
        sender: String,
        reply: Reply,
    },
    SetRecordingUrl {
        url: String,
        reply: Reply,
    },
    EndCall {
        reply: Reply,
    },
}

/// 実行中のセッションへの操作口
///
/// 複製して複数箇所から使える。すべて drop されるとセッションは後始末して終わる。
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| CallError::SessionClosed)?;
        rx.await.map_err(|_| CallError::SessionClosed)?
    }

    /// マイクのミュート切り替え（再ネゴシエーションなし）
    pub async fn toggle_audio(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|reply| Command::SetTrackEnabled {
            kind: TrackKind::Audio,
            enabled,
            reply,
        })
        .await
    }

    pub async fn toggle_video(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|reply| Command::SetTrackEnabled {
            kind: TrackKind::Video,
            enabled,
            reply,
        })
        .await
    }

    pub async fn start_screen_share(&self) -> Result<(), CallError> {
        self.request(|reply| Command::StartScreenShare { reply })
            .await
    }

    pub async fn stop_screen_share(&self) -> Result<(), CallError> {
        self.request(|reply| Command::StopScreenShare { reply }).await
    }

    pub async fn send_chat_message(
        &self,
        text: impl Into<String>,
        sender: impl Into<String>,
    ) -> Result<(), CallError> {
        let text = text.into();
        let sender = sender.into();
        self.request(|reply| Command::SendChat {
            text,
            sender,
            reply,
        })
        .await
    }

    /// 通話終了時に予約システムへ渡す録画URL
    pub async fn set_recording_url(&self, url: impl Into<String>) -> Result<(), CallError> {
        let url = url.into();
        self.request(|reply| Command::SetRecordingUrl { url, reply })
            .await
    }

    /// 通話を終了する。終了済みなら何もしない
    pub async fn end_call(&self) -> Result<(), CallError> {
        match self.request(|reply| Command::EndCall { reply }).await {
            Err(CallError::SessionClosed) => Ok(()),
            other => other,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// 条件を満たすスナップショットが出るまで待つ
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, CallError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| CallError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    pub async fn wait_for_state(&self, state: CallState) -> Result<SessionSnapshot, CallError> {
        self.wait_for(|snapshot| snapshot.state == state).await
    }
}

/// 1参加者・1通話ぶんのセッション
///
/// ローカルメディア、PeerConnection、シグナリング接続を専有し、
/// コマンド・シグナリング・PeerConnection のイベントとネゴシエーションタイマーだけで状態を進める。
/// 終了したセッションは再利用できない。
pub struct CallSession {
    config: SessionConfig,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingConnector>,
    recording_sink: Option<Arc<dyn RecordingSink>>,

    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    peer_events_tx: PeerEventSender,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,

    state: CallState,
    role: Option<Role>,
    error: Option<CallError>,
    joined: bool,
    local: Option<LocalStream>,
    remote: RemoteStream,
    peer: Option<Arc<dyn PeerConnection>>,
    outbound: Option<SignalingOutbound>,
    inbound: Option<SignalingInbound>,
    chat: ChatLog,
    audio_enabled: bool,
    video_enabled: bool,
    screen_sharing: bool,
    recording_url: Option<String>,
    negotiation_deadline: Option<Instant>,
    torn_down: bool,
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnector>,
        signaling: Arc<dyn SignalingConnector>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (peer_events_tx, peer_events) = mpsc::unbounded_channel();

        let session = Self {
            config,
            media,
            peers,
            signaling,
            recording_sink: None,
            commands: command_rx,
            snapshot_tx,
            peer_events_tx,
            peer_events,
            state: CallState::Idle,
            role: None,
            error: None,
            joined: false,
            local: None,
            remote: RemoteStream::default(),
            peer: None,
            outbound: None,
            inbound: None,
            chat: ChatLog::default(),
            audio_enabled: true,
            video_enabled: true,
            screen_sharing: false,
            recording_url: None,
            negotiation_deadline: None,
            torn_down: false,
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (session, handle)
    }

    pub fn with_recording_sink(mut self, sink: Arc<dyn RecordingSink>) -> Self {
        self.recording_sink = Some(sink);
        self
    }

    /// 通話を開始し、終了（end_call かハンドルの全 drop）まで動かす
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Session started for room {} as {}",
            self.config.room_id, self.config.display_name
        );

        if let Err(err) = self.start().await {
            self.fail(err);
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            debug!("All session handles dropped");
                            self.teardown().await;
                            break;
                        }
                    }
                }
                event = recv_signaling(&mut self.inbound) => {
                    self.handle_signaling(event).await;
                }
                Some(event) = self.peer_events.recv() => {
                    self.handle_peer_event(event);
                }
                _ = sleep_until_deadline(self.negotiation_deadline) => {
                    self.on_negotiation_timeout();
                }
            }
        }

        info!("Session for room {} ended", self.config.room_id);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CallError> {
        self.set_state(CallState::AcquiringMedia);
        let stream = self
            .media
            .get_user_media(self.config.constraints)
            .await
            .map_err(CallError::from)?;
        stream.set_enabled(TrackKind::Audio, self.audio_enabled);
        stream.set_enabled(TrackKind::Video, self.video_enabled);
        info!("Local media acquired ({} tracks)", stream.tracks().len());
        self.local = Some(stream);

        self.set_state(CallState::SocketConnecting);
        let link = self
            .signaling
            .connect()
            .await
            .map_err(|e| CallError::SignalingConnection(format!("{:#}", e)))?;
        self.outbound = Some(link.outbound);
        self.inbound = Some(link.inbound);

        self.send_signaling(ClientMessage::Join {
            room_id: self.config.room_id.clone(),
        })
        .map_err(|_| CallError::SignalingLost)?;
        info!("Join requested for room {}", self.config.room_id);
        self.publish();
        Ok(())
    }

    /// 通話を続けるなら true
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SetTrackEnabled {
                kind,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.set_track_enabled(kind, enabled));
            }
            Command::StartScreenShare { reply } => {
                let result = self.start_screen_share().await;
                if let Err(e) = &result {
                    warn!("Screen share not started: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::StopScreenShare { reply } => {
                let result = self.stop_screen_share().await;
                if let Err(e) = &result {
                    warn!("Screen share not stopped: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::SendChat {
                text,
                sender,
                reply,
            } => {
                let _ = reply.send(self.send_chat(text, sender));
            }
            Command::SetRecordingUrl { url, reply } => {
                info!("Recording URL set for room {}", self.config.room_id);
                self.recording_url = Some(url);
                let _ = reply.send(Ok(()));
            }
            Command::EndCall { reply } => {
                self.teardown().await;
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> Result<(), CallError> {
        match kind {
            TrackKind::Audio => self.audio_enabled = enabled,
            TrackKind::Video => self.video_enabled = enabled,
        }
        let changed = self
            .local
            .as_ref()
            .map(|stream| stream.set_enabled(kind, enabled))
            .unwrap_or(0);
        info!(
            "{:?} {} ({} tracks)",
            kind,
            if enabled { "enabled" } else { "muted" },
            changed
        );
        self.publish();
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<(), CallError> {
        if !matches!(self.state, CallState::Negotiating | CallState::Connected) {
            return Err(CallError::InvalidState {
                operation: "start_screen_share",
                state: self.state.to_string(),
            });
        }
        if self.screen_sharing {
            return Err(CallError::ScreenShare(
                "screen share is already active".to_string(),
            ));
        }
        let peer = self.peer.clone().ok_or_else(|| CallError::InvalidState {
            operation: "start_screen_share",
            state: self.state.to_string(),
        })?;

        let mut display = self
            .media
            .get_display_media()
            .await
            .map_err(|e| CallError::ScreenShare(e.to_string()))?;
        let screen = display
            .take_tracks()
            .into_iter()
            .find(|t| t.kind() == TrackKind::Video)
            .ok_or_else(|| {
                CallError::ScreenShare("display capture returned no video track".to_string())
            })?;
        screen.set_enabled(self.video_enabled);

        if let Err(e) = peer.replace_track(screen.clone()).await {
            screen.stop();
            return Err(CallError::ScreenShare(format!("{:#}", e)));
        }

        let screen_id = screen.id().to_string();
        if let Some(camera) = self.local.as_mut().and_then(|s| s.replace_track(screen)) {
            camera.stop();
        }
        self.screen_sharing = true;
        info!("Screen share started ({})", screen_id);
        self.publish();
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<(), CallError> {
        if !self.screen_sharing {
            return Err(CallError::ScreenShare("no screen share is active".to_string()));
        }
        if self.state.is_terminal() {
            return Err(CallError::InvalidState {
                operation: "stop_screen_share",
                state: self.state.to_string(),
            });
        }

        // カメラとマイクを取り直して両方差し替える
        let mut fresh = self
            .media
            .get_user_media(self.config.constraints)
            .await
            .map_err(CallError::from)?;
        let tracks = fresh.take_tracks();
        for track in &tracks {
            track.set_enabled(match track.kind() {
                TrackKind::Audio => self.audio_enabled,
                TrackKind::Video => self.video_enabled,
            });
        }

        if let Some(peer) = self.peer.clone() {
            for (sent, track) in tracks.iter().enumerate() {
                let Err(e) = peer.replace_track(track.clone()).await else {
                    continue;
                };
                // 差し替え済みの種別は元のトラックに戻してから新しい方を止める
                for replaced in &tracks[..sent] {
                    let previous = self
                        .local
                        .as_ref()
                        .and_then(|local| local.track(replaced.kind()).cloned());
                    if let Some(previous) = previous {
                        if let Err(e) = peer.replace_track(previous).await {
                            warn!("Failed to put back {:?} track: {:#}", replaced.kind(), e);
                        }
                    }
                }
                for track in &tracks {
                    track.stop();
                }
                return Err(CallError::ScreenShare(format!(
                    "failed to restore camera: {:#}",
                    e
                )));
            }
        }

        if let Some(local) = self.local.as_mut() {
            for track in tracks {
                if let Some(previous) = local.replace_track(track) {
                    previous.stop();
                }
            }
        }
        self.screen_sharing = false;
        info!("Screen share stopped, camera restored");
        self.publish();
        Ok(())
    }

    fn send_chat(&mut self, text: String, sender: String) -> Result<(), CallError> {
        if !self.joined {
            return Err(CallError::NotJoined);
        }
        if self.outbound.is_none() {
            return Err(CallError::SignalingClosed);
        }

        let message = ChatMessage::new(self.config.room_id.clone(), sender, text);
        self.chat.push_sent(&message);
        self.publish();
        self.send_signaling(ClientMessage::ChatMessage(message))
    }

    fn send_signaling(&mut self, msg: ClientMessage) -> Result<(), CallError> {
        let outbound = self.outbound.as_ref().ok_or(CallError::SignalingClosed)?;
        if outbound.send(msg).is_err() {
            warn!("Signaling link dropped while sending");
            self.outbound = None;
            self.publish();
            return Err(CallError::SignalingClosed);
        }
        Ok(())
    }

    fn send_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        debug!("Sending {:?} ({} bytes)", desc.kind, desc.sdp.len());
        self.send_signaling(ClientMessage::Signal {
            room_id: self.config.room_id.clone(),
            payload: desc.to_payload(),
        })
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(msg) => self.handle_server_message(msg).await,
            SignalingEvent::Closed { reason } => {
                match reason {
                    Some(reason) => warn!("Signaling connection closed: {}", reason),
                    None => info!("Signaling connection closed"),
                }
                self.inbound = None;
                self.outbound = None;
                if self.state.is_pre_connection() {
                    self.fail(CallError::SignalingLost);
                } else {
                    self.publish();
                }
            }
        }
    }

    async fn handle_server_message(&mut self, msg: ServerMessage) {
        if self.state.is_terminal() {
            debug!("Ignoring {:?} in state {}", msg, self.state);
            return;
        }

        match msg {
            ServerMessage::Joined {
                room_id,
                handle,
                initiator,
            } => {
                let role = Role::from_initiator(initiator);
                info!("Joined room {} as {} ({:?})", room_id, handle, role);
                self.role = Some(role);
                self.joined = true;
                self.set_state(CallState::JoinedWaiting);
            }
            ServerMessage::PeerJoined { handle } => {
                info!("Peer {} joined room {}", handle, self.config.room_id);
            }
            ServerMessage::RoomReady => self.on_room_ready().await,
            ServerMessage::Signal { payload, .. } => self.on_signal(payload).await,
            ServerMessage::ChatMessage(message) => {
                debug!("Chat from {}", message.sender);
                self.chat.push_received(&message);
                self.publish();
            }
            ServerMessage::PeerLeft => self.on_peer_gone("peer left the room"),
            ServerMessage::Error { code, message } => self.on_coordinator_error(code, message),
        }
    }

    async fn on_room_ready(&mut self) {
        if self.state != CallState::JoinedWaiting {
            debug!("Ignoring room-ready in state {}", self.state);
            return;
        }
        let Some(role) = self.role else {
            warn!("room-ready received before join acknowledgement");
            return;
        };

        info!("Room {} ready, negotiating as {:?}", self.config.room_id, role);
        self.negotiation_deadline = self
            .config
            .negotiation_timeout
            .map(|timeout| Instant::now() + timeout);
        self.set_state(CallState::Negotiating);

        let tracks = self
            .local
            .as_ref()
            .map(|stream| stream.tracks().to_vec())
            .unwrap_or_default();
        let peer = match self
            .peers
            .create(
                PeerOptions {
                    initiator: role.is_initiator(),
                },
                tracks,
                self.peer_events_tx.clone(),
            )
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                self.fail(CallError::Negotiation(format!("{:#}", e)));
                return;
            }
        };
        self.peer = Some(peer.clone());

        if role.is_initiator() {
            match peer.create_offer().await {
                Ok(offer) => {
                    if self.send_description(offer).is_err() {
                        self.fail(CallError::SignalingLost);
                    }
                }
                Err(e) => self.fail(CallError::Negotiation(format!("{:#}", e))),
            }
        }
    }

    async fn on_signal(&mut self, payload: serde_json::Value) {
        let desc = match SessionDescription::from_payload(&payload) {
            Ok(desc) => desc,
            Err(e) => {
                warn!("Ignoring unrecognized signal payload: {}", e);
                return;
            }
        };
        if !matches!(self.state, CallState::Negotiating | CallState::Connected) {
            debug!("Ignoring {:?} in state {}", desc.kind, self.state);
            return;
        }
        let Some(peer) = self.peer.clone() else {
            warn!("Received {:?} without a peer connection", desc.kind);
            return;
        };

        match (desc.kind, self.role) {
            (SdpKind::Offer, Some(Role::Responder)) => match peer.accept_offer(desc).await {
                Ok(answer) => {
                    if self.send_description(answer).is_err() {
                        self.fail(CallError::SignalingLost);
                    }
                }
                Err(e) => self.fail(CallError::Negotiation(format!("{:#}", e))),
            },
            (SdpKind::Answer, Some(Role::Initiator)) => {
                if let Err(e) = peer.accept_answer(desc).await {
                    self.fail(CallError::Negotiation(format!("{:#}", e)));
                }
            }
            (kind, role) => warn!("Unexpected {:?} for role {:?}", kind, role),
        }
    }

    fn on_peer_gone(&mut self, reason: &str) {
        match self.state {
            CallState::Negotiating | CallState::Connected => {
                info!("Peer disconnected: {}", reason);
                self.negotiation_deadline = None;
                self.set_state(CallState::PeerDisconnected);
            }
            state => debug!("Ignoring peer loss ({}) in state {}", reason, state),
        }
    }

    fn on_coordinator_error(&mut self, code: ErrorCode, message: String) {
        match code {
            ErrorCode::RoomFull => self.fail(CallError::RoomFull {
                room_id: self.config.room_id.clone(),
            }),
            _ if !self.joined => self.fail(CallError::Rejected { code, message }),
            _ => warn!("Coordinator reported {}: {}", code, message),
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        if self.state.is_terminal() {
            debug!("Ignoring {:?} in state {}", event, self.state);
            return;
        }

        match event {
            PeerEvent::Connected => self.mark_connected(),
            PeerEvent::RemoteTrack(track) => {
                info!("Remote {:?} track arrived: {}", track.kind, track.id);
                self.remote.add(track);
                self.mark_connected();
            }
            PeerEvent::Disconnected | PeerEvent::Closed | PeerEvent::Failed(_) => {
                let reason = match &event {
                    PeerEvent::Failed(reason) => reason.clone(),
                    other => format!("peer connection reported {:?}", other),
                };
                if self.state == CallState::Negotiating {
                    self.fail(CallError::Negotiation(reason));
                } else {
                    self.on_peer_gone(&reason);
                }
            }
        }
    }

    fn mark_connected(&mut self) {
        if self.state == CallState::Negotiating {
            self.negotiation_deadline = None;
            self.set_state(CallState::Connected);
        } else {
            self.publish();
        }
    }

    fn on_negotiation_timeout(&mut self) {
        self.negotiation_deadline = None;
        if self.state == CallState::Negotiating {
            self.fail(CallError::NegotiationTimeout);
        }
    }

    fn fail(&mut self, err: CallError) {
        error!("Call failed in state {}: {}", self.state, err);
        self.negotiation_deadline = None;
        self.error = Some(err);
        self.set_state(CallState::Error);
    }

    /// PeerConnection を閉じ、トラックを止め、シグナリングを閉じる。
    /// どこかで失敗しても残りは必ず実行する。
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        info!("Tearing down session for room {}", self.config.room_id);
        self.negotiation_deadline = None;

        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer connection: {:#}", e);
            }
        }

        if let Some(local) = self.local.take() {
            local.stop_all();
            debug!("Stopped {} local tracks", local.tracks().len());
        }

        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(ClientMessage::Leave);
        }
        self.inbound = None;
        self.screen_sharing = false;
        self.chat.clear();
        self.remote.clear();

        if let Some(url) = self.recording_url.take() {
            match &self.recording_sink {
                Some(sink) => {
                    if let Err(e) = sink.submit(&self.config.room_id, &url).await {
                        warn!("Failed to hand off recording URL: {:#}", e);
                    }
                }
                None => debug!("No recording sink configured, dropping recording URL"),
            }
        }

        self.set_state(CallState::Disconnected);
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            info!("Call state: {} -> {}", self.state, state);
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> SessionSnapshot {
        let local = match &self.local {
            Some(stream) => LocalMediaSummary {
                live_tracks: stream.live_track_count(),
                audio_enabled: stream
                    .audio_track()
                    .map(|t| t.is_enabled())
                    .unwrap_or(self.audio_enabled),
                video_enabled: stream
                    .video_track()
                    .map(|t| t.is_enabled())
                    .unwrap_or(self.video_enabled),
                video_source: stream.video_track().map(|t| t.source()),
            },
            None => LocalMediaSummary {
                live_tracks: 0,
                audio_enabled: self.audio_enabled,
                video_enabled: self.video_enabled,
                video_source: None,
            },
        };

        SessionSnapshot {
            state: self.state,
            role: self.role,
            error: self.error.clone(),
            chat_log: self.chat.entries().to_vec(),
            local,
            remote_tracks: self.remote.tracks.clone(),
            signaling_connected: self.outbound.is_some(),
            screen_sharing: self.screen_sharing,
        }
    }
}

async fn recv_signaling(inbound: &mut Option<SignalingInbound>) -> SignalingEvent {
    match inbound {
        Some(rx) => rx
            .recv()
            .await
            .unwrap_or(SignalingEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
