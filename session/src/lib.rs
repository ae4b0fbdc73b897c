// CallSession: 1参加者・1通話ぶんの状態機械
// chat: 通話中のチャット履歴
// recording: 通話終了時の録画URL受け渡し
mod chat;
mod recording;
mod session;
mod state;

pub use chat::{ChatEntry, ChatLog};
pub use recording::{HttpRecordingSink, RecordingSink};
pub use session::{CallSession, SessionConfig, SessionHandle, DEFAULT_NEGOTIATION_TIMEOUT};
pub use state::{CallState, LocalMediaSummary, Role, SessionSnapshot};
