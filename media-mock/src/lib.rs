// devices: カメラ・マイク・画面の代わりになる MediaDevices
// peer: SDP 交換だけを模した PeerConnector
mod devices;
mod peer;

pub use devices::{MockMediaConfig, MockMediaDevices};
pub use peer::{LoopbackPeerConnector, MockPeerConfig, MockPeerConnection};
