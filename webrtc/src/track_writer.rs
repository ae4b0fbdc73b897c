use anyhow::{Context, Result};
use bytes::Bytes;
use core_types::MediaTrack;
use std::sync::Arc;
use std::time::Duration;
use tracing::{span, trace, Instrument, Level};
use webrtc_rs::media::Sample;
use webrtc_rs::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc_rs::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// 送信中のトラックと、その取得元のローカルトラック
pub struct OutgoingTrack {
    pub source: Arc<MediaTrack>,
    pub sample_track: Arc<TrackLocalStaticSample>,
    pub sender: Arc<RTCRtpSender>,
}

impl OutgoingTrack {
    /// サンプルを書き込む。ミュート中・停止済みなら捨てて false を返す
    pub async fn write(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.source.is_live() || !self.source.is_enabled() {
            trace!("Dropping sample for muted or stopped track {}", self.source.id());
            return Ok(false);
        }

        let sample_size = data.len();
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };

        let write_sample_span = span!(
            Level::DEBUG,
            "write_sample",
            track = self.source.id(),
            sample_size = sample_size
        );
        self.sample_track
            .write_sample(&sample)
            .instrument(write_sample_span)
            .await
            .context("Failed to write sample to track")?;
        Ok(true)
    }
}
