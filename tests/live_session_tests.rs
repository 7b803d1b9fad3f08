// Integration tests for the streaming session lifecycle
//
// These run against an in-process WebSocket server standing in for the
// recognition service, and a scripted capture backend standing in for the
// microphone, so the whole engine is exercised without devices or network.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use zoonote_live::{
    AudioFrame, CaptureBackend, DeviceError, SessionConfig, SessionError, SessionStatus,
    StreamingSessionController,
};

/// Capture backend that replays synthetic frames on a fixed cadence.
/// The frame channel stays open until `stop()`, like a real device.
struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    stopped: Arc<AtomicBool>,
    capturing: Arc<AtomicBool>,
}

impl ScriptedBackend {
    fn new(frame_count: u64) -> Self {
        let frames = (0..frame_count)
            .map(|i| AudioFrame {
                sequence: i,
                timestamp_ms: i * 20,
                samples: vec![i as i16; 160],
            })
            .collect();
        Self::with_frames(frames)
    }

    fn with_frames(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            stopped: Arc::new(AtomicBool::new(false)),
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stopped_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        let (tx, rx) = mpsc::channel(8);
        let frames = self.frames.clone();
        let stopped = Arc::clone(&self.stopped);
        let capturing = Arc::clone(&self.capturing);

        // A restart behaves like a freshly acquired device
        stopped.store(false, Ordering::SeqCst);
        capturing.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            for frame in frames {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
            while !stopped.load(Ordering::SeqCst) {
                sleep(Duration::from_millis(5)).await;
            }
            capturing.store(false, Ordering::SeqCst);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Backend whose device acquisition always fails
struct FailingBackend;

#[async_trait::async_trait]
impl CaptureBackend for FailingBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        Err(DeviceError::NoInputDevice)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Backend whose device dies mid-stream: it delivers a few frames, then
/// closes the frame channel without `stop()` having been called.
struct DyingBackend {
    frames_before_death: u64,
}

#[async_trait::async_trait]
impl CaptureBackend for DyingBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        let (tx, rx) = mpsc::channel(8);
        let frames = self.frames_before_death;

        tokio::spawn(async move {
            for i in 0..frames {
                let frame = AudioFrame {
                    sequence: i,
                    timestamp_ms: i * 20,
                    samples: vec![0; 160],
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
                sleep(Duration::from_millis(20)).await;
            }
            // Sender drops here, closing the channel while the session
            // still considers itself streaming
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "dying"
    }
}

#[derive(Clone)]
enum ServerMode {
    /// After the first binary frame, send the scripted payloads, then keep
    /// serving until the client closes
    Script(Vec<String>),
    /// Send one partial, then drop the connection without a close handshake
    DropAfterPartial,
    /// Accept the handshake but never read or write again
    Hang,
}

async fn spawn_server(mode: ServerMode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mode = mode.clone();

            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                match mode {
                    ServerMode::Script(events) => {
                        let mut sent = false;
                        while let Some(Ok(msg)) = ws.next().await {
                            match msg {
                                Message::Binary(_) if !sent => {
                                    sent = true;
                                    for event in &events {
                                        if ws.send(Message::Text(event.clone())).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Message::Close(_) => break,
                                _ => {}
                            }
                        }
                    }
                    ServerMode::DropAfterPartial => {
                        while let Some(Ok(msg)) = ws.next().await {
                            if matches!(msg, Message::Binary(_)) {
                                let _ = ws
                                    .send(Message::Text(
                                        r#"{"event":"partial","text":"обрыв"}"#.to_string(),
                                    ))
                                    .await;
                                // Hard drop, no close handshake
                                return;
                            }
                        }
                    }
                    ServerMode::Hang => {
                        sleep(Duration::from_secs(30)).await;
                    }
                }
            });
        }
    });

    addr
}

fn controller_for(
    addr: SocketAddr,
    backend: Box<dyn CaptureBackend>,
) -> StreamingSessionController {
    StreamingSessionController::new(
        SessionConfig {
            engine_url: format!("ws://{}", addr),
            drain_timeout: Duration::from_millis(500),
        },
        backend,
    )
}

fn full_event_script() -> Vec<String> {
    vec![
        r#"{"event":"partial","text":"привет"}"#.to_string(),
        r#"{"event":"final","text":"привет мир"}"#.to_string(),
        r#"{"event":"entity_update","entities":{"animal":"giraffe"}}"#.to_string(),
        r#"{"event":"entity_update","entities":{"animal":"lion"}}"#.to_string(),
        r#"{"event":"stats","stats":{"rtf":0.35,"cpu_load":42.0}}"#.to_string(),
    ]
}

#[tokio::test]
async fn session_streams_frames_and_merges_events() {
    let addr = spawn_server(ServerMode::Script(full_event_script())).await;
    let backend = ScriptedBackend::new(100);
    let stopped = backend.stopped_flag();
    let controller = controller_for(addr, Box::new(backend));

    controller.start("ru").await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Streaming);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let doc = controller.document().await;
        if doc.committed == "привет мир" && doc.last_stats.is_some() {
            // Entity snapshots: last full snapshot wins
            assert_eq!(doc.entities["animal"], "lion");
            assert_eq!(doc.entities.len(), 1);
            assert_eq!(doc.pending, "");
            break;
        }
        assert!(Instant::now() < deadline, "transcript did not converge");
        sleep(Duration::from_millis(20)).await;
    }

    let stats = controller.stats().await;
    assert!(stats.frames_sent >= 1, "frames should have been transmitted");
    assert_eq!(stats.events_received, 5);

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Closed);
    assert!(stopped.load(Ordering::SeqCst), "capture device not released");
}

#[tokio::test]
async fn connect_url_carries_lang_and_session_id() {
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        })
        .await
        .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let controller = controller_for(addr, Box::new(ScriptedBackend::new(10)));
    controller.start("ru").await.unwrap();

    let uri = timeout(Duration::from_secs(2), uri_rx).await.unwrap().unwrap();
    assert!(uri.starts_with("/ws/transcribe?"), "unexpected path: {}", uri);
    assert!(uri.contains("lang=ru"), "missing lang: {}", uri);
    assert!(uri.contains("session_id=live-"), "missing session id: {}", uri);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn frames_arrive_as_raw_little_endian_pcm16() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (payload_tx, payload_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut payload_tx = Some(payload_tx);
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Binary(bytes) => {
                    if let Some(tx) = payload_tx.take() {
                        let _ = tx.send(bytes);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let frame = AudioFrame {
        sequence: 0,
        timestamp_ms: 0,
        samples: vec![1, -2, 300],
    };
    let controller = controller_for(addr, Box::new(ScriptedBackend::with_frames(vec![frame])));
    controller.start("ru").await.unwrap();

    let bytes = timeout(Duration::from_secs(2), payload_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x2C, 0x01]);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn connect_failure_fails_session_and_releases_device() {
    // Bind then drop: connections to this port are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = ScriptedBackend::new(10);
    let stopped = backend.stopped_flag();
    let controller = controller_for(addr, Box::new(backend));

    let err = controller.start("ru").await.unwrap_err();
    assert!(matches!(err, SessionError::Channel(_)), "got {:?}", err);
    assert_eq!(controller.status().await, SessionStatus::Failed);
    assert!(stopped.load(Ordering::SeqCst), "capture not torn down");
    assert_eq!(controller.stats().await.frames_sent, 0);
}

#[tokio::test]
async fn device_failure_fails_session() {
    let addr = spawn_server(ServerMode::Script(vec![])).await;
    let controller = controller_for(addr, Box::new(FailingBackend));

    let err = controller.start("ru").await.unwrap_err();
    assert!(matches!(err, SessionError::Device(_)), "got {:?}", err);
    assert_eq!(controller.status().await, SessionStatus::Failed);

    // Stop from Failed releases resources but stays Failed
    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Failed);
}

#[tokio::test]
async fn capture_death_mid_session_fails_the_session() {
    let addr = spawn_server(ServerMode::Script(vec![])).await;
    let controller = controller_for(addr, Box::new(DyingBackend { frames_before_death: 3 }));

    controller.start("ru").await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Streaming);

    // The frame channel closing with no stop in flight must surface as a
    // session failure, not a silent stall
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.status().await != SessionStatus::Failed {
        assert!(Instant::now() < deadline, "device death never failed the session");
        sleep(Duration::from_millis(20)).await;
    }

    let doc = controller.document().await;
    let reason = doc.last_error.as_deref().unwrap_or("");
    assert!(reason.contains("capture"), "unexpected failure reason: {}", reason);

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Failed);
}

#[tokio::test]
async fn start_is_rejected_while_streaming() {
    let addr = spawn_server(ServerMode::Script(vec![])).await;
    let controller = controller_for(addr, Box::new(ScriptedBackend::new(50)));

    controller.start("ru").await.unwrap();
    let err = controller.start("ru").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState(_)), "got {:?}", err);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn restart_after_stop_mints_a_fresh_session_id() {
    let addr = spawn_server(ServerMode::Script(vec![])).await;
    let controller = controller_for(addr, Box::new(ScriptedBackend::new(50)));

    controller.start("ru").await.unwrap();
    let first = controller.stats().await.session_id;
    controller.stop().await.unwrap();

    controller.start("ru").await.unwrap();
    let second = controller.stats().await.session_id;
    controller.stop().await.unwrap();

    assert!(first.starts_with("live-"));
    assert!(second.starts_with("live-"));
    assert_ne!(first, second, "session ids must never be reused");
}

#[tokio::test]
async fn stop_from_idle_is_idempotent() {
    // Address never dialed: stop without start touches nothing
    let controller = StreamingSessionController::new(
        SessionConfig::default(),
        Box::new(ScriptedBackend::new(0)),
    );

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Closed);

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Closed);
}

#[tokio::test]
async fn connection_loss_mid_session_fails_without_reconnect() {
    let addr = spawn_server(ServerMode::DropAfterPartial).await;
    let backend = ScriptedBackend::new(100);
    let stopped = backend.stopped_flag();
    let controller = controller_for(addr, Box::new(backend));

    controller.start("ru").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.status().await != SessionStatus::Failed {
        assert!(Instant::now() < deadline, "session never failed");
        sleep(Duration::from_millis(20)).await;
    }

    let doc = controller.document().await;
    assert!(doc.last_error.is_some(), "connection loss not surfaced");

    controller.stop().await.unwrap();
    assert_eq!(controller.status().await, SessionStatus::Failed);
    assert!(stopped.load(Ordering::SeqCst), "capture device not released");
}

#[tokio::test]
async fn stop_is_bounded_even_when_the_service_hangs() {
    let addr = spawn_server(ServerMode::Hang).await;
    let controller = controller_for(addr, Box::new(ScriptedBackend::new(100)));

    controller.start("ru").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let begin = Instant::now();
    controller.stop().await.unwrap();

    assert!(
        begin.elapsed() < Duration::from_secs(3),
        "stop took {:?}",
        begin.elapsed()
    );
    assert_eq!(controller.status().await, SessionStatus::Closed);
}

#[tokio::test]
async fn pending_partial_is_discarded_at_stop() {
    let script = vec![r#"{"event":"partial","text":"незаконченная мысль"}"#.to_string()];
    let addr = spawn_server(ServerMode::Script(script)).await;
    let controller = controller_for(addr, Box::new(ScriptedBackend::new(100)));

    controller.start("ru").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.document().await.pending.is_empty() {
        assert!(Instant::now() < deadline, "partial never arrived");
        sleep(Duration::from_millis(20)).await;
    }

    controller.stop().await.unwrap();

    let doc = controller.document().await;
    assert_eq!(doc.pending, "", "unfinalized partial must be discarded");
    assert_eq!(doc.committed, "", "partial must not be auto-committed");
}

#[tokio::test]
async fn malformed_events_are_skipped_without_closing() {
    let script = vec![
        r#"{"event":"speaker_change","speaker":2}"#.to_string(),
        "not json at all".to_string(),
        r#"{"event":"final","text":"выжил"}"#.to_string(),
    ];
    let addr = spawn_server(ServerMode::Script(script)).await;
    let controller = controller_for(addr, Box::new(ScriptedBackend::new(100)));

    controller.start("ru").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.document().await.committed != "выжил" {
        assert!(Instant::now() < deadline, "final after junk never merged");
        sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(controller.status().await, SessionStatus::Streaming);
    // Only the well-formed event counts
    assert_eq!(controller.stats().await.events_received, 1);

    controller.stop().await.unwrap();
}
