use thiserror::Error;

use crate::protocol::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
    PermissionDenied,
    NotFound,
    Busy,
    Other,
}

/// デバイスからメディアを取得できなかった
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::NotFound, message)
    }
}

/// 通話のエラー分類
///
/// 通話を終わらせるものはスナップショットの `error` に載り、
/// 呼び出し元だけの失敗（画面共有など）は戻り値で返す。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("media acquisition failed ({kind:?}): {message}")]
    MediaAcquisition {
        kind: MediaErrorKind,
        message: String,
    },

    #[error("cannot reach signaling coordinator: {0}")]
    SignalingConnection(String),

    #[error("signaling connection lost before the call was established")]
    SignalingLost,

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("negotiation did not complete in time")]
    NegotiationTimeout,

    #[error("room {room_id} already has two participants")]
    RoomFull { room_id: String },

    #[error("coordinator rejected request ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("screen share failed: {0}")]
    ScreenShare(String),

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("not joined to a room yet")]
    NotJoined,

    #[error("signaling connection is closed")]
    SignalingClosed,

    #[error("session has already ended")]
    SessionClosed,
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        CallError::MediaAcquisition {
            kind: err.kind,
            message: err.message,
        }
    }
}
