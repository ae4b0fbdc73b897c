use chrono::{DateTime, Utc};
use core_types::ChatMessage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// 自分が送ったもの（送信時に楽観的に追加される）
    pub from_self: bool,
}

/// 追記のみのチャット履歴。通話終了時に破棄する
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn push_sent(&mut self, message: &ChatMessage) {
        self.push(message, true);
    }

    pub fn push_received(&mut self, message: &ChatMessage) {
        self.push(message, false);
    }

    fn push(&mut self, message: &ChatMessage, from_self: bool) {
        self.entries.push(ChatEntry {
            sender: message.sender.clone(),
            text: message.message.clone(),
            timestamp: message.timestamp,
            from_self,
        });
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
