#[cfg(test)]
mod tests {
    use anyhow::Result;
    use core_types::{CallError, PeerConnector, TrackSource};
    use media_mock::{LoopbackPeerConnector, MockMediaDevices, MockPeerConfig};
    use session::{CallSession, CallState, Role, SessionConfig, SessionHandle, SessionSnapshot};
    use signaling::{Coordinator, WsSignalingConnector};
    use std::sync::{Arc, Mutex, Once};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use webrtc::{PeerConfig, RtcPeerConnector};

    static INIT_TRACING: Once = Once::new();

    /// tracingを初期化（テスト実行時に一度だけ実行される）
    fn init_tracing() {
        INIT_TRACING.call_once(|| {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_test_writer()
                .init();
        });
    }

    /// 実ソケットで待ち受けるコーディネーターを起動する
    async fn start_coordinator() -> Result<(String, Arc<Coordinator>)> {
        let coordinator = Arc::new(Coordinator::new());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(signaling::serve(listener, coordinator.clone()));
        Ok((format!("ws://{}/ws", addr), coordinator))
    }

    struct Participant {
        handle: SessionHandle,
        devices: Arc<MockMediaDevices>,
        states: Arc<Mutex<Vec<CallState>>>,
        task: JoinHandle<Result<()>>,
    }

    impl Participant {
        fn join(url: &str, room: &str, name: &str, peers: Arc<dyn PeerConnector>) -> Self {
            let devices = Arc::new(MockMediaDevices::default());
            let signaling = Arc::new(WsSignalingConnector::new(url).with_max_attempts(1));
            let (session, handle) =
                CallSession::new(SessionConfig::new(room, name), devices.clone(), peers, signaling);
            let states = record_states(&handle);
            let task = tokio::spawn(session.run());
            Self {
                handle,
                devices,
                states,
                task,
            }
        }

        async fn wait_state(&self, state: CallState, secs: u64) -> SessionSnapshot {
            timeout(Duration::from_secs(secs), self.handle.wait_for_state(state))
                .await
                .unwrap_or_else(|_| {
                    panic!(
                        "Timed out waiting for {}, last snapshot: {:?}",
                        state,
                        self.handle.snapshot()
                    )
                })
                .expect("Session closed")
        }

        fn states(&self) -> Vec<CallState> {
            self.states.lock().unwrap().clone()
        }

        async fn end(self) -> Arc<MockMediaDevices> {
            self.handle.end_call().await.unwrap();
            timeout(Duration::from_secs(10), self.task)
                .await
                .expect("Session task did not finish")
                .unwrap()
                .unwrap();
            self.devices
        }
    }

    /// 観測した状態の並びを記録する
    fn record_states(handle: &SessionHandle) -> Arc<Mutex<Vec<CallState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let out = states.clone();
        let mut rx = handle.subscribe();
        tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().state;
                {
                    let mut states = out.lock().unwrap();
                    if states.last() != Some(&state) {
                        states.push(state);
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        states
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("Condition not reached in time");
    }

    fn loopback() -> Arc<LoopbackPeerConnector> {
        Arc::new(LoopbackPeerConnector::default())
    }

    fn negotiated_after_connect(states: &[CallState]) -> bool {
        states
            .iter()
            .skip_while(|s| **s != CallState::Connected)
            .any(|s| *s == CallState::Negotiating)
    }

    #[tokio::test]
    async fn test_consultation_end_to_end() -> Result<()> {
        init_tracing();
        let (url, coordinator) = start_coordinator().await?;

        let a = Participant::join(&url, "apt-42", "patient", loopback());
        let waiting = a.wait_state(CallState::JoinedWaiting, 5).await;
        assert_eq!(waiting.role, Some(Role::Initiator));

        let b = Participant::join(&url, "apt-42", "doctor", loopback());
        let a_connected = a.wait_state(CallState::Connected, 5).await;
        let b_connected = b.wait_state(CallState::Connected, 5).await;
        assert_eq!(a_connected.role, Some(Role::Initiator));
        assert_eq!(b_connected.role, Some(Role::Responder));
        assert_eq!(coordinator.occupant_count("apt-42"), 2);

        // 画面共有は再ネゴシエーションなしで切り替わる
        a.handle.start_screen_share().await.unwrap();
        let sharing = a.handle.snapshot();
        assert_eq!(sharing.state, CallState::Connected);
        assert_eq!(sharing.local.video_source, Some(TrackSource::Screen));

        // チャットはシグナリング経由で順に届く
        for text in ["can you see my screen?", "this is the report"] {
            a.handle.send_chat_message(text, "patient").await.unwrap();
        }
        let chat = timeout(
            Duration::from_secs(5),
            b.handle.wait_for(|s| s.chat_log.len() == 2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(chat.chat_log[0].text, "can you see my screen?");
        assert_eq!(chat.chat_log[1].text, "this is the report");

        assert!(!negotiated_after_connect(&a.states()));
        assert!(!negotiated_after_connect(&b.states()));

        let b_devices = b.end().await;
        assert_eq!(b_devices.live_track_count(), 0);

        let left = a.wait_state(CallState::PeerDisconnected, 5).await;
        assert_eq!(left.local.live_tracks, 2);

        let handle = a.handle.clone();
        let a_devices = a.end().await;
        assert_eq!(a_devices.live_track_count(), 0);
        assert!(!handle.snapshot().signaling_connected);

        eventually(|| coordinator.rooms().is_empty() && coordinator.connection_count() == 0).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_room_full_over_socket() -> Result<()> {
        init_tracing();
        let (url, coordinator) = start_coordinator().await?;

        let a = Participant::join(&url, "apt-7", "patient", loopback());
        a.wait_state(CallState::JoinedWaiting, 5).await;
        let b = Participant::join(&url, "apt-7", "doctor", loopback());
        b.wait_state(CallState::Connected, 5).await;

        let c = Participant::join(&url, "apt-7", "observer", loopback());
        let rejected = c.wait_state(CallState::Error, 5).await;
        assert!(matches!(rejected.error, Some(CallError::RoomFull { .. })));
        assert_eq!(coordinator.occupant_count("apt-7"), 2);

        assert_eq!(c.end().await.live_track_count(), 0);
        assert_eq!(a.handle.snapshot().state, CallState::Connected);
        a.end().await;
        b.end().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_teardown_survives_failing_peer_close() -> Result<()> {
        init_tracing();
        let (url, coordinator) = start_coordinator().await?;

        let failing = Arc::new(LoopbackPeerConnector::new(MockPeerConfig {
            fail_close: true,
            ..Default::default()
        }));
        let a = Participant::join(&url, "apt-9", "patient", failing);
        a.wait_state(CallState::JoinedWaiting, 5).await;
        let b = Participant::join(&url, "apt-9", "doctor", loopback());
        a.wait_state(CallState::Connected, 5).await;
        b.wait_state(CallState::Connected, 5).await;

        let a_handle = a.handle.clone();
        let a_devices = a.end().await;
        assert_eq!(a_devices.live_track_count(), 0);
        assert_eq!(a_handle.snapshot().state, CallState::Disconnected);
        assert!(!a_handle.snapshot().signaling_connected);

        // 相手はシグナリング経由で離脱を知る
        b.wait_state(CallState::PeerDisconnected, 5).await;
        eventually(|| coordinator.occupant_count("apt-9") == 1).await;
        b.end().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_webrtc_sessions_connect_over_loopback() -> Result<()> {
        init_tracing();
        let (url, _coordinator) = start_coordinator().await?;
        let rtc = || {
            Arc::new(RtcPeerConnector::new(PeerConfig {
                ice_servers: vec![],
                include_loopback: true,
            }))
        };

        let a = Participant::join(&url, "apt-rtc", "patient", rtc());
        a.wait_state(CallState::JoinedWaiting, 5).await;
        let b = Participant::join(&url, "apt-rtc", "doctor", rtc());

        a.wait_state(CallState::Connected, 30).await;
        b.wait_state(CallState::Connected, 30).await;

        a.handle.start_screen_share().await.unwrap();
        assert_eq!(a.handle.snapshot().state, CallState::Connected);

        assert_eq!(a.end().await.live_track_count(), 0);
        assert_eq!(b.end().await.live_track_count(), 0);
        Ok(())
    }
}
