use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// トラックの取得元デバイス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// ローカルのメディアトラック
///
/// `enabled` は送出のミュート、`live` はデバイスを掴んでいるかどうか。
/// 一度 stop したトラックは再開できない。
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    enabled: AtomicBool,
    live: AtomicBool,
    release: Mutex<Option<ReleaseHook>>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            kind,
            source,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            release: Mutex::new(None),
        }
    }

    /// stop 時に一度だけ呼ばれるフック（デバイス解放用）
    pub fn with_release(self, hook: impl FnOnce() + Send + 'static) -> Self {
        if let Ok(mut slot) = self.release.lock() {
            *slot = Some(Box::new(hook));
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let hook = match self.release.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl Drop for MediaTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// セッションが専有するローカルストリーム
///
/// drop 時にすべてのトラックを stop する。
#[derive(Debug, Default)]
pub struct LocalStream {
    tracks: Vec<Arc<MediaTrack>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn audio_track(&self) -> Option<&Arc<MediaTrack>> {
        self.track(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&Arc<MediaTrack>> {
        self.track(TrackKind::Video)
    }

    /// 指定種別のトラックの enabled を切り替え、変更したトラック数を返す
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        let mut changed = 0;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            changed += 1;
        }
        changed
    }

    /// 同じ種別のトラックを差し替え、古いトラックを返す（stop はしない）
    pub fn replace_track(&mut self, track: Arc<MediaTrack>) -> Option<Arc<MediaTrack>> {
        match self.tracks.iter().position(|t| t.kind() == track.kind()) {
            Some(idx) => Some(std::mem::replace(&mut self.tracks[idx], track)),
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn take_tracks(&mut self) -> Vec<Arc<MediaTrack>> {
        std::mem::take(&mut self.tracks)
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// カメラ・マイク・画面キャプチャの取得口
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints)
        -> Result<LocalStream, MediaError>;

    async fn get_display_media(&self) -> Result<LocalStream, MediaError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// 相手側から届いたストリーム（ネゴシエーション完了後に非同期で埋まる）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn add(&mut self, track: RemoteTrack) {
        if !self.tracks.iter().any(|t| t.id == track.id) {
            self.tracks.push(track);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stop_runs_release_hook_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let track = MediaTrack::new("cam-0", TrackKind::Video, TrackSource::Camera)
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        track.stop();
        track.stop();
        drop(track);

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggle_keeps_track_live() {
        let stream = LocalStream::new(vec![
            Arc::new(MediaTrack::new("mic-0", TrackKind::Audio, TrackSource::Microphone)),
            Arc::new(MediaTrack::new("cam-0", TrackKind::Video, TrackSource::Camera)),
        ]);

        assert_eq!(stream.set_enabled(TrackKind::Audio, false), 1);
        let audio = stream.audio_track().unwrap();
        assert!(!audio.is_enabled());
        assert!(audio.is_live());
        assert!(stream.video_track().unwrap().is_enabled());
    }

    #[test]
    fn test_dropping_stream_stops_shared_tracks() {
        let track = Arc::new(MediaTrack::new("cam-0", TrackKind::Video, TrackSource::Camera));
        let stream = LocalStream::new(vec![track.clone()]);
        assert_eq!(stream.live_track_count(), 1);

        drop(stream);
        assert!(!track.is_live());
    }

    #[test]
    fn test_replace_track_returns_previous() {
        let mut stream = LocalStream::new(vec![Arc::new(MediaTrack::new(
            "cam-0",
            TrackKind::Video,
            TrackSource::Camera,
        ))]);
        let screen = Arc::new(MediaTrack::new("screen-0", TrackKind::Video, TrackSource::Screen));

        let old = stream.replace_track(screen).unwrap();
        assert_eq!(old.id(), "cam-0");
        assert_eq!(stream.video_track().unwrap().source(), TrackSource::Screen);
        assert_eq!(stream.tracks().len(), 1);
    }
}
