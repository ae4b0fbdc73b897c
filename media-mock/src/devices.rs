use async_trait::async_trait;
use core_types::{
    LocalStream, MediaConstraints, MediaDevices, MediaError, MediaErrorKind, MediaTrack,
    TrackKind, TrackSource,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// ダミーデバイスの挙動設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockMediaConfig {
    /// カメラ・マイク取得を失敗させる
    pub user_media_error: Option<MediaErrorKind>,
    /// 画面キャプチャ取得を失敗させる
    pub display_media_error: Option<MediaErrorKind>,
}

/// 実デバイスを使わない MediaDevices
///
/// 払い出したトラックはすべて解放フックでカウントされるので、
/// テストから「掴んだままのデバイス」の数を確認できる。
pub struct MockMediaDevices {
    config: Mutex<MockMediaConfig>,
    live_tracks: Arc<AtomicUsize>,
    next_id: AtomicU64,
    user_media_requests: AtomicUsize,
    display_media_requests: AtomicUsize,
}

impl MockMediaDevices {
    pub fn new(config: MockMediaConfig) -> Self {
        Self {
            config: Mutex::new(config),
            live_tracks: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
            user_media_requests: AtomicUsize::new(0),
            display_media_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_user_media_error(&self, kind: Option<MediaErrorKind>) {
        self.update_config(|config| config.user_media_error = kind);
    }

    pub fn set_display_media_error(&self, kind: Option<MediaErrorKind>) {
        self.update_config(|config| config.display_media_error = kind);
    }

    /// まだ stop されていないトラック数
    pub fn live_track_count(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    pub fn user_media_requests(&self) -> usize {
        self.user_media_requests.load(Ordering::SeqCst)
    }

    pub fn display_media_requests(&self) -> usize {
        self.display_media_requests.load(Ordering::SeqCst)
    }

    fn update_config(&self, f: impl FnOnce(&mut MockMediaConfig)) {
        match self.config.lock() {
            Ok(mut config) => f(&mut config),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn current_config(&self) -> MockMediaConfig {
        match self.config.lock() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn open_track(&self, kind: TrackKind, source: TrackSource) -> Arc<MediaTrack> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-{}-{}", source_label(source), n);
        let live = self.live_tracks.clone();
        live.fetch_add(1, Ordering::SeqCst);

        let release_id = id.clone();
        debug!("Mock device opened: {}", id);
        Arc::new(MediaTrack::new(id, kind, source).with_release(move || {
            live.fetch_sub(1, Ordering::SeqCst);
            debug!("Mock device released: {}", release_id);
        }))
    }
}

impl Default for MockMediaDevices {
    fn default() -> Self {
        Self::new(MockMediaConfig::default())
    }
}

fn source_label(source: TrackSource) -> &'static str {
    match source {
        TrackSource::Microphone => "mic",
        TrackSource::Camera => "cam",
        TrackSource::Screen => "screen",
    }
}

fn failure(kind: MediaErrorKind, what: &str) -> MediaError {
    let message = match kind {
        MediaErrorKind::PermissionDenied => format!("{} permission denied", what),
        MediaErrorKind::NotFound => format!("no {} device found", what),
        MediaErrorKind::Busy => format!("{} device is in use", what),
        MediaErrorKind::Other => format!("{} device failure", what),
    };
    MediaError::new(kind, message)
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<LocalStream, MediaError> {
        self.user_media_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.current_config().user_media_error {
            warn!("Mock user media request failing with {:?}", kind);
            return Err(failure(kind, "camera/microphone"));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.open_track(TrackKind::Audio, TrackSource::Microphone));
        }
        if constraints.video {
            tracks.push(self.open_track(TrackKind::Video, TrackSource::Camera));
        }
        info!("Mock user media acquired ({} tracks)", tracks.len());
        Ok(LocalStream::new(tracks))
    }

    async fn get_display_media(&self) -> Result<LocalStream, MediaError> {
        self.display_media_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.current_config().display_media_error {
            warn!("Mock display media request failing with {:?}", kind);
            return Err(failure(kind, "screen"));
        }

        let track = self.open_track(TrackKind::Video, TrackSource::Screen);
        info!("Mock display media acquired: {}", track.id());
        Ok(LocalStream::new(vec![track]))
    }
}
