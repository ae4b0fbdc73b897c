mod connection;
mod track_writer;

pub use connection::{
    codec_to_mime_type, IceServer, PeerConfig, RtcPeerConnection, RtcPeerConnector,
};
pub use track_writer::OutgoingTrack;
