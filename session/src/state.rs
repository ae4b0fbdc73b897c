use core_types::{CallError, RemoteTrack, TrackSource};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::ChatEntry;

/// 通話の状態
///
/// `idle → acquiring-media → socket-connecting → joined-waiting → negotiating
/// → connected → (peer-disconnected | error) → disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    AcquiringMedia,
    SocketConnecting,
    JoinedWaiting,
    Negotiating,
    Connected,
    PeerDisconnected,
    Error,
    Disconnected,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::AcquiringMedia => "acquiring-media",
            CallState::SocketConnecting => "socket-connecting",
            CallState::JoinedWaiting => "joined-waiting",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::PeerDisconnected => "peer-disconnected",
            CallState::Error => "error",
            CallState::Disconnected => "disconnected",
        }
    }

    /// 直接接続が確立する前の状態
    pub fn is_pre_connection(&self) -> bool {
        matches!(
            self,
            CallState::Idle
                | CallState::AcquiringMedia
                | CallState::SocketConnecting
                | CallState::JoinedWaiting
                | CallState::Negotiating
        )
    }

    /// これ以上イベントで遷移しない状態
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Error | CallState::Disconnected)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// コーディネーターが割り当てる役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn from_initiator(initiator: bool) -> Self {
        if initiator {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Initiator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMediaSummary {
    pub live_tracks: usize,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub video_source: Option<TrackSource>,
}

impl Default for LocalMediaSummary {
    fn default() -> Self {
        Self {
            live_tracks: 0,
            audio_enabled: true,
            video_enabled: true,
            video_source: None,
        }
    }
}

/// 外から観測できるセッションの状態一式
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: CallState,
    pub role: Option<Role>,
    /// 最後に起きた通話エラー
    pub error: Option<CallError>,
    pub chat_log: Vec<ChatEntry>,
    pub local: LocalMediaSummary,
    pub remote_tracks: Vec<RemoteTrack>,
    pub signaling_connected: bool,
    pub screen_sharing: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            role: None,
            error: None,
            chat_log: Vec::new(),
            local: LocalMediaSummary::default(),
            remote_tracks: Vec::new(),
            signaling_connected: false,
            screen_sharing: false,
        }
    }
}
