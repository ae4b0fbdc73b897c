use core_types::{ChatMessage, ClientMessage, ConnectionHandle, ErrorCode, ServerMessage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 1ルームの最大参加者数（患者と医師の2者のみ）
pub const MAX_OCCUPANTS: usize = 2;

pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("room {room_id} is full")]
    RoomFull { room_id: String },
    #[error("connection already joined room {room_id}")]
    AlreadyJoined { room_id: String },
    #[error("connection is not an occupant of room {room_id}")]
    NotInRoom { room_id: String },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionHandle),
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::RoomFull { .. } => ErrorCode::RoomFull,
            CoordinatorError::AlreadyJoined { .. } => ErrorCode::AlreadyJoined,
            CoordinatorError::NotInRoom { .. } | CoordinatorError::UnknownConnection(_) => {
                ErrorCode::NotInRoom
            }
        }
    }
}

/// join の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub initiator: bool,
    pub ready: bool,
}

struct Occupant {
    handle: ConnectionHandle,
    initiator: bool,
    outbox: Outbox,
}

#[derive(Default)]
struct Room {
    occupants: Vec<Occupant>,
    ready: bool,
}

impl Room {
    fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.occupants.iter().any(|o| &o.handle == handle)
    }

    fn send_to_others(&self, sender: &ConnectionHandle, msg: &ServerMessage) -> usize {
        let mut delivered = 0;
        for occupant in self.occupants.iter().filter(|o| &o.handle != sender) {
            if occupant.outbox.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Outbox of {} is closed, dropping message", occupant.handle);
            }
        }
        delivered
    }
}

struct Connection {
    outbox: Outbox,
    room: Option<String>,
}

/// 運用向けのルーム一覧
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub occupants: Vec<ConnectionHandle>,
    pub ready: bool,
}

/// シグナリングコーディネーター
///
/// ルームの参加者管理と中継のみを行い、payload の中身は解釈しない。
/// ルームはシャード分割されたマップに置くので、別ルームの中継同士は競合しない。
/// 1接続のメッセージは受信タスクが順に処理する前提。
#[derive(Default)]
pub struct Coordinator {
    rooms: DashMap<String, Room>,
    connections: DashMap<ConnectionHandle, Connection>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しい接続を登録し、その接続宛てのメッセージ受信口を返す
    pub fn register(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let handle = ConnectionHandle(Uuid::new_v4().to_string());
        let (outbox, rx) = mpsc::unbounded_channel();
        self.connections
            .insert(handle.clone(), Connection { outbox, room: None });
        debug!("Connection registered: {}", handle);
        (handle, rx)
    }

    /// クライアントからのメッセージを処理する。失敗は送信元に error として返す
    pub fn handle_message(&self, handle: &ConnectionHandle, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::Join { room_id } => self.join(handle, &room_id).map(|_| ()),
            ClientMessage::Signal { room_id, payload } => {
                self.relay(handle, &room_id, payload).map(|_| ())
            }
            ClientMessage::ChatMessage(chat) => self.relay_chat(handle, chat).map(|_| ()),
            ClientMessage::Leave => {
                self.leave(handle);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Request from {} rejected: {}", handle, e);
            self.send_error(handle, e.code(), e.to_string());
        }
    }

    pub fn send_error(&self, handle: &ConnectionHandle, code: ErrorCode, message: String) {
        if let Some(conn) = self.connections.get(handle) {
            let _ = conn.outbox.send(ServerMessage::Error { code, message });
        }
    }

    /// ルームに参加する
    ///
    /// 人数確認と追加はルームのエントリロック内で一度に行う。
    pub fn join(
        &self,
        handle: &ConnectionHandle,
        room_id: &str,
    ) -> Result<JoinOutcome, CoordinatorError> {
        let outbox = {
            let conn = self
                .connections
                .get(handle)
                .ok_or_else(|| CoordinatorError::UnknownConnection(handle.clone()))?;
            if let Some(current) = &conn.room {
                return Err(CoordinatorError::AlreadyJoined {
                    room_id: current.clone(),
                });
            }
            conn.outbox.clone()
        };

        let outcome = {
            let mut room = self.rooms.entry(room_id.to_string()).or_default();
            if room.occupants.len() >= MAX_OCCUPANTS {
                return Err(CoordinatorError::RoomFull {
                    room_id: room_id.to_string(),
                });
            }

            let initiator = !room.occupants.iter().any(|o| o.initiator);
            room.occupants.push(Occupant {
                handle: handle.clone(),
                initiator,
                outbox: outbox.clone(),
            });

            let _ = outbox.send(ServerMessage::Joined {
                room_id: room_id.to_string(),
                handle: handle.clone(),
                initiator,
            });

            if room.occupants.len() == MAX_OCCUPANTS {
                room.ready = true;
                room.send_to_others(
                    handle,
                    &ServerMessage::PeerJoined {
                        handle: handle.clone(),
                    },
                );
                for occupant in &room.occupants {
                    let _ = occupant.outbox.send(ServerMessage::RoomReady);
                }
            }

            JoinOutcome {
                initiator,
                ready: room.ready,
            }
        };

        if let Some(mut conn) = self.connections.get_mut(handle) {
            conn.room = Some(room_id.to_string());
        }

        info!(
            "{} joined room {} (initiator: {}, ready: {})",
            handle, room_id, outcome.initiator, outcome.ready
        );
        Ok(outcome)
    }

    /// ネゴシエーションデータを他の参加者へそのまま中継する
    pub fn relay(
        &self,
        handle: &ConnectionHandle,
        room_id: &str,
        payload: serde_json::Value,
    ) -> Result<usize, CoordinatorError> {
        let msg = ServerMessage::Signal {
            room_id: room_id.to_string(),
            payload,
        };
        let delivered = self.relay_to_others(handle, room_id, &msg)?;
        debug!("Signal relayed in room {} to {} peer(s)", room_id, delivered);
        Ok(delivered)
    }

    pub fn relay_chat(
        &self,
        handle: &ConnectionHandle,
        chat: ChatMessage,
    ) -> Result<usize, CoordinatorError> {
        let room_id = chat.room_id.clone();
        let message = ServerMessage::ChatMessage(chat);
        let delivered = self.relay_to_others(handle, &room_id, &message)?;
        debug!("Chat relayed in room {} to {} peer(s)", room_id, delivered);
        Ok(delivered)
    }

    fn relay_to_others(
        &self,
        handle: &ConnectionHandle,
        room_id: &str,
        msg: &ServerMessage,
    ) -> Result<usize, CoordinatorError> {
        let room = self
            .rooms
            .get(room_id)
            .filter(|room| room.contains(handle))
            .ok_or_else(|| CoordinatorError::NotInRoom {
                room_id: room_id.to_string(),
            })?;
        Ok(room.send_to_others(handle, msg))
    }

    /// 参加中のルームから抜ける。抜けたルームIDを返す
    pub fn leave(&self, handle: &ConnectionHandle) -> Option<String> {
        let room_id = self.connections.get_mut(handle)?.room.take()?;

        if let Entry::Occupied(mut entry) = self.rooms.entry(room_id.clone()) {
            let room = entry.get_mut();
            room.occupants.retain(|o| &o.handle != handle);
            room.ready = false;

            if room.occupants.is_empty() {
                entry.remove();
                info!("{} left room {}, room destroyed", handle, room_id);
            } else {
                room.send_to_others(handle, &ServerMessage::PeerLeft);
                info!("{} left room {}, peer notified", handle, room_id);
            }
        }

        Some(room_id)
    }

    /// 切断時の後始末（leave してから登録を消す）
    pub fn disconnect(&self, handle: &ConnectionHandle) {
        self.leave(handle);
        if self.connections.remove(handle).is_some() {
            debug!("Connection unregistered: {}", handle);
        }
    }

    pub fn occupant_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.occupants.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn rooms(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|entry| RoomSnapshot {
                room_id: entry.key().clone(),
                occupants: entry.occupants.iter().map(|o| o.handle.clone()).collect(),
                ready: entry.ready,
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_first_join_only_acknowledges() {
        let coordinator = Coordinator::new();
        let (a, mut a_rx) = coordinator.register();

        let outcome = coordinator.join(&a, "apt-42").unwrap();
        assert!(outcome.initiator);
        assert!(!outcome.ready);

        let msgs = drain(&mut a_rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(&msgs[0], ServerMessage::Joined { initiator: true, .. }));
    }

    #[test]
    fn test_second_join_makes_room_ready() {
        let coordinator = Coordinator::new();
        let (a, mut a_rx) = coordinator.register();
        let (b, mut b_rx) = coordinator.register();

        coordinator.join(&a, "apt-42").unwrap();
        let outcome = coordinator.join(&b, "apt-42").unwrap();
        assert!(!outcome.initiator);
        assert!(outcome.ready);

        let a_msgs = drain(&mut a_rx);
        assert_eq!(
            &a_msgs[1..],
            &[
                ServerMessage::PeerJoined { handle: b.clone() },
                ServerMessage::RoomReady
            ]
        );

        let b_msgs = drain(&mut b_rx);
        assert!(matches!(&b_msgs[0], ServerMessage::Joined { initiator: false, .. }));
        assert_eq!(b_msgs[1], ServerMessage::RoomReady);
    }

    #[test]
    fn test_third_join_rejected_without_mutation() {
        let coordinator = Coordinator::new();
        let (a, _a_rx) = coordinator.register();
        let (b, _b_rx) = coordinator.register();
        let (c, mut c_rx) = coordinator.register();

        coordinator.join(&a, "apt-42").unwrap();
        coordinator.join(&b, "apt-42").unwrap();

        coordinator.handle_message(
            &c,
            ClientMessage::Join {
                room_id: "apt-42".to_string(),
            },
        );

        assert_eq!(coordinator.occupant_count("apt-42"), 2);
        let snapshot = coordinator.rooms();
        assert_eq!(snapshot[0].occupants, vec![a, b]);
        assert_eq!(
            drain(&mut c_rx),
            vec![ServerMessage::Error {
                code: ErrorCode::RoomFull,
                message: "room apt-42 is full".to_string(),
            }]
        );
    }

    #[test]
    fn test_concurrent_joins_never_exceed_two() {
        let coordinator = Arc::new(Coordinator::new());
        let handles: Vec<_> = (0..16).map(|_| coordinator.register()).collect();

        let threads: Vec<_> = handles
            .iter()
            .map(|(handle, _)| {
                let coordinator = coordinator.clone();
                let handle = handle.clone();
                std::thread::spawn(move || coordinator.join(&handle, "apt-42"))
            })
            .collect();

        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();

        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted.iter().filter(|o| o.initiator).count(), 1);
        assert_eq!(coordinator.occupant_count("apt-42"), 2);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CoordinatorError::RoomFull { .. })));
    }

    #[test]
    fn test_relay_goes_to_others_only() {
        let coordinator = Coordinator::new();
        let (a, mut a_rx) = coordinator.register();
        let (b, mut b_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();
        coordinator.join(&b, "apt-42").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let payload = serde_json::json!({ "type": "offer", "sdp": "v=0" });
        assert_eq!(coordinator.relay(&a, "apt-42", payload.clone()).unwrap(), 1);

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::Signal {
                room_id: "apt-42".to_string(),
                payload,
            }]
        );
    }

    #[test]
    fn test_relay_preserves_sender_order() {
        let coordinator = Coordinator::new();
        let (a, _a_rx) = coordinator.register();
        let (b, mut b_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();
        coordinator.join(&b, "apt-42").unwrap();
        drain(&mut b_rx);

        for i in 0..50 {
            coordinator
                .relay_chat(&a, ChatMessage::new("apt-42", "patient", format!("m{}", i)))
                .unwrap();
        }

        let texts: Vec<String> = drain(&mut b_rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::ChatMessage(chat) => Some(chat.message),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_relay_from_outsider_rejected() {
        let coordinator = Coordinator::new();
        let (a, _a_rx) = coordinator.register();
        let (outsider, _o_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();

        let err = coordinator
            .relay(&outsider, "apt-42", serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInRoom);
    }

    #[test]
    fn test_double_join_rejected() {
        let coordinator = Coordinator::new();
        let (a, _a_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();

        let err = coordinator.join(&a, "apt-43").unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::AlreadyJoined {
                room_id: "apt-42".to_string()
            }
        );
        assert_eq!(coordinator.occupant_count("apt-43"), 0);
    }

    #[test]
    fn test_leave_notifies_and_destroys_room() {
        let coordinator = Coordinator::new();
        let (a, mut a_rx) = coordinator.register();
        let (b, _b_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();
        coordinator.join(&b, "apt-42").unwrap();
        drain(&mut a_rx);

        assert_eq!(coordinator.leave(&b), Some("apt-42".to_string()));
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::PeerLeft]);
        assert_eq!(coordinator.occupant_count("apt-42"), 1);
        assert!(!coordinator.rooms()[0].ready);

        coordinator.disconnect(&a);
        assert!(coordinator.rooms().is_empty());
        assert_eq!(coordinator.leave(&a), None);
    }

    #[test]
    fn test_rejoin_after_leave_assigns_initiator() {
        let coordinator = Coordinator::new();
        let (a, _a_rx) = coordinator.register();
        let (b, _b_rx) = coordinator.register();
        let (c, _c_rx) = coordinator.register();
        coordinator.join(&a, "apt-42").unwrap();
        coordinator.join(&b, "apt-42").unwrap();

        // 初回の initiator が抜けたら、次の参加者が initiator になる
        coordinator.leave(&a);
        let outcome = coordinator.join(&c, "apt-42").unwrap();
        assert!(outcome.initiator);
        assert!(outcome.ready);
    }
}
