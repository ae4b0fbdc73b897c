use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use media_mock::MockMediaDevices;
use session::{CallSession, HttpRecordingSink, SessionConfig, SessionHandle, SessionSnapshot};
use signaling::WsSignalingConnector;
use webrtc::{IceServer, PeerConfig, RtcPeerConnector};

pub struct JoinOptions {
    pub url: String,
    pub room: String,
    pub name: String,
    pub negotiation_timeout: Option<Duration>,
    pub ice_servers: Vec<String>,
    pub include_loopback: bool,
    pub recording_sink: Option<String>,
}

/// ヘッドレス参加者として通話に入り、標準入力をチャットと操作に使う
pub async fn run(options: JoinOptions) -> Result<()> {
    info!(
        "Joining room {} at {} as {}",
        options.room, options.url, options.name
    );

    let ice_servers = if options.ice_servers.is_empty() {
        Vec::new()
    } else {
        vec![IceServer {
            urls: options.ice_servers,
            username: None,
            credential: None,
        }]
    };
    let peers = Arc::new(RtcPeerConnector::new(PeerConfig {
        ice_servers,
        include_loopback: options.include_loopback,
    }));
    let media = Arc::new(MockMediaDevices::default());
    let signaling = Arc::new(WsSignalingConnector::new(options.url));

    let mut config = SessionConfig::new(options.room, options.name.clone());
    config.negotiation_timeout = options.negotiation_timeout;

    let (mut session, handle) = CallSession::new(config, media, peers, signaling);
    if let Some(base_url) = options.recording_sink {
        info!("Recording URLs will be sent to {}", base_url);
        session = session.with_recording_sink(Arc::new(HttpRecordingSink::new(base_url)?));
    }

    let session_task = tokio::spawn(session.run());
    let reporter = tokio::spawn(report(handle.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if !handle_line(&handle, &options.name, line.trim()).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, staying in the call until interrupted");
                        stdin_open = false;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Interrupted");
                break;
            }
        }
    }

    handle.end_call().await?;
    session_task.await.context("Session task panicked")??;
    reporter.abort();
    info!("Participant stopped");
    Ok(())
}

/// 入力1行を処理する。通話を抜けるなら false
async fn handle_line(handle: &SessionHandle, name: &str, line: &str) -> bool {
    let result = match line {
        "" => return true,
        "/quit" => return false,
        "/status" => {
            print_status(&handle.snapshot());
            return true;
        }
        "/mute" => handle.toggle_audio(false).await,
        "/unmute" => handle.toggle_audio(true).await,
        "/camera off" => handle.toggle_video(false).await,
        "/camera on" => handle.toggle_video(true).await,
        "/share" => handle.start_screen_share().await,
        "/unshare" => handle.stop_screen_share().await,
        _ => match line.strip_prefix("/record ") {
            Some(url) => handle.set_recording_url(url.trim()).await,
            None => handle.send_chat_message(line, name).await,
        },
    };

    if let Err(e) = result {
        warn!("{}: {}", line, e);
    }
    true
}

fn print_status(snapshot: &SessionSnapshot) {
    println!(
        "state={} role={:?} signaling={} sharing={} local_tracks={} remote_tracks={}",
        snapshot.state,
        snapshot.role,
        snapshot.signaling_connected,
        snapshot.screen_sharing,
        snapshot.local.live_tracks,
        snapshot.remote_tracks.len()
    );
}

// 状態変化と受信チャットを表示する
async fn report(mut rx: watch::Receiver<SessionSnapshot>) {
    let mut last_state = None;
    let mut seen_chat = 0;
    loop {
        {
            let snapshot = rx.borrow_and_update();
            if last_state != Some(snapshot.state) {
                println!("* {}", snapshot.state);
                if let Some(err) = &snapshot.error {
                    println!("* error: {}", err);
                }
                last_state = Some(snapshot.state);
            }
            for entry in snapshot
                .chat_log
                .iter()
                .skip(seen_chat)
                .filter(|entry| !entry.from_self)
            {
                println!(
                    "[{}] {}: {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.sender,
                    entry.text
                );
            }
            seen_chat = snapshot.chat_log.len();
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
