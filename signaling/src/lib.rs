// Coordinator: ルーム管理と中継（2者限定）
// server: axum の WebSocket エンドポイント
// client / local: セッション側から使うコネクタ
pub mod client;
pub mod coordinator;
pub mod local;
pub mod server;

pub use client::WsSignalingConnector;
pub use coordinator::{Coordinator, CoordinatorError, JoinOutcome, RoomSnapshot, MAX_OCCUPANTS};
pub use local::LocalSignalingConnector;
pub use server::{router, serve};
