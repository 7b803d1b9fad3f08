use super::config::SessionConfig;
use super::document::TranscriptDocument;
use super::stats::SessionStats;
use crate::audio::{AudioFrame, CaptureBackend};
use crate::channel::{EventStream, FrameSink, TranscriptChannel};
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Recording lifecycle status
///
/// `Closed` and `Failed` are terminal for a given session; a new `start`
/// mints a fresh session id rather than reviving the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Closed,
    Failed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle
    }
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Closed => "closed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Identity of the current (or most recent) recording attempt
#[derive(Debug, Clone)]
struct SessionMeta {
    session_id: String,
    language: String,
    started_at: DateTime<Utc>,
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            language: String::new(),
            started_at: Utc::now(),
        }
    }
}

/// State shared between the controller and its session tasks
///
/// The transcript document is mutated only by the pump task (the single
/// consumer); everything else reads snapshots through the locks.
#[derive(Default)]
struct Shared {
    status: Mutex<SessionStatus>,
    meta: Mutex<SessionMeta>,
    document: Mutex<TranscriptDocument>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    events_received: AtomicU64,
}

impl Shared {
    async fn fail(&self, reason: &str) {
        *self.status.lock().await = SessionStatus::Failed;
        self.document.lock().await.last_error = Some(reason.to_string());
    }
}

/// Handles owned by one recording attempt, created by `start` and consumed
/// by `stop`
struct SessionHandle {
    session_id: String,
    shutdown_tx: watch::Sender<bool>,
    pump_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

/// Owns the recording lifecycle: coordinates the capture backend and the
/// recognition channel, applies the frame-drop backpressure policy, and
/// drives the transcript document with inbound events.
pub struct StreamingSessionController {
    config: SessionConfig,
    backend: Mutex<Box<dyn CaptureBackend>>,
    /// Lifecycle lock: serializes `start` and `stop` so a stop racing an
    /// in-flight start always observes a fully constructed session.
    session: Mutex<Option<SessionHandle>>,
    shared: Arc<Shared>,
}

impl StreamingSessionController {
    pub fn new(config: SessionConfig, backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            config,
            backend: Mutex::new(backend),
            session: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Start a new recording attempt
    ///
    /// Valid from `Idle`, `Closed`, or `Failed`. Acquires the capture
    /// device and opens the channel concurrently; if either fails the other
    /// is torn down and the session moves to `Failed` with the originating
    /// error.
    pub async fn start(&self, language: &str) -> Result<(), SessionError> {
        let mut session = self.session.lock().await;

        {
            let status = *self.shared.status.lock().await;
            match status {
                SessionStatus::Idle | SessionStatus::Closed | SessionStatus::Failed => {}
                other => return Err(SessionError::InvalidState(other.as_str())),
            }
        }

        let session_id = format!("live-{}", uuid::Uuid::new_v4());
        info!("Starting session {} (lang={})", session_id, language);

        *self.shared.status.lock().await = SessionStatus::Connecting;
        *self.shared.meta.lock().await = SessionMeta {
            session_id: session_id.clone(),
            language: language.to_string(),
            started_at: Utc::now(),
        };
        *self.shared.document.lock().await = TranscriptDocument::new();
        self.shared.frames_sent.store(0, Ordering::Relaxed);
        self.shared.frames_dropped.store(0, Ordering::Relaxed);
        self.shared.events_received.store(0, Ordering::Relaxed);

        let mut backend = self.backend.lock().await;
        let (capture_res, channel_res) = tokio::join!(
            backend.start(),
            TranscriptChannel::connect(&self.config.engine_url, language, &session_id),
        );

        let (frame_rx, channel) = match (capture_res, channel_res) {
            (Ok(rx), Ok(ch)) => (rx, ch),
            (Ok(_rx), Err(e)) => {
                if let Err(stop_err) = backend.stop().await {
                    warn!("Capture teardown after failed connect: {}", stop_err);
                }
                self.shared.fail(&e.to_string()).await;
                return Err(e.into());
            }
            (Err(e), Ok(ch)) => {
                // Dropping the channel releases the connection
                drop(ch);
                self.shared.fail(&e.to_string()).await;
                return Err(e.into());
            }
            (Err(e), Err(channel_err)) => {
                warn!("Channel also failed during aborted start: {}", channel_err);
                self.shared.fail(&e.to_string()).await;
                return Err(e.into());
            }
        };

        let (sink, events) = channel.into_split();

        // Outbound path: a capacity-1 hand-off into a dedicated writer. A
        // full queue means the writer is still transmitting the previous
        // frame, so the new frame is dropped rather than queued or blocked.
        let (out_tx, out_rx) = mpsc::channel::<AudioFrame>(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let writer_task = tokio::spawn(writer_loop(sink, out_rx));
        let pump_task = tokio::spawn(pump_loop(
            Arc::clone(&self.shared),
            frame_rx,
            events,
            out_tx,
            shutdown_rx,
        ));

        *session = Some(SessionHandle {
            session_id,
            shutdown_tx,
            pump_task,
            writer_task,
        });
        *self.shared.status.lock().await = SessionStatus::Streaming;

        info!("Session streaming");
        Ok(())
    }

    /// Stop the current recording attempt
    ///
    /// Idempotent and valid in every state; safe to call concurrently with
    /// an in-flight `start`. Two-phase shutdown: the capture device is
    /// stopped first so no new frames appear, then the outbound direction
    /// is closed and trailing events are drained up to `drain_timeout`
    /// before the inbound side is forced shut. A `Failed` session stays
    /// `Failed` but still has its resources released.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut session = self.session.lock().await;

        let handle = match session.take() {
            Some(handle) => handle,
            None => {
                let mut status = self.shared.status.lock().await;
                if !status.is_terminal() {
                    *status = SessionStatus::Closed;
                }
                return Ok(());
            }
        };

        info!("Stopping session {}", handle.session_id);

        let was_failed = {
            let mut status = self.shared.status.lock().await;
            if *status == SessionStatus::Failed {
                true
            } else {
                *status = SessionStatus::Stopping;
                false
            }
        };

        // Phase 1: stop capture so no new frames are produced
        {
            let mut backend = self.backend.lock().await;
            if let Err(e) = backend.stop().await {
                warn!("Capture stop failed: {}", e);
            }
        }

        // Phase 2: signal end-of-stream and wait, bounded, for trailing
        // final/entity events to arrive and be merged
        let _ = handle.shutdown_tx.send(true);
        let mut pump = handle.pump_task;
        if timeout(self.config.drain_timeout, &mut pump).await.is_err() {
            // Phase 3: forcibly close the inbound direction
            warn!("Drain timeout reached, forcing inbound close");
            pump.abort();
            let _ = pump.await;
        }

        let mut writer = handle.writer_task;
        if timeout(Duration::from_secs(1), &mut writer).await.is_err() {
            writer.abort();
            let _ = writer.await;
        }

        // An unfinalized partial at stop time is discarded: only final
        // events carry authoritative committed text.
        {
            let mut doc = self.shared.document.lock().await;
            if !doc.pending.is_empty() {
                debug!("Discarding unfinalized partial: {:?}", doc.pending);
                doc.pending.clear();
            }
        }

        if !was_failed {
            *self.shared.status.lock().await = SessionStatus::Closed;
        }

        info!("Session {} stopped", handle.session_id);
        Ok(())
    }

    pub async fn status(&self) -> SessionStatus {
        *self.shared.status.lock().await
    }

    /// Snapshot of the transcript document
    pub async fn document(&self) -> TranscriptDocument {
        self.shared.document.lock().await.clone()
    }

    /// Snapshot of session statistics
    pub async fn stats(&self) -> SessionStats {
        let status = *self.shared.status.lock().await;
        let meta = self.shared.meta.lock().await.clone();
        let last_stats = self.shared.document.lock().await.last_stats;

        let duration = Utc::now().signed_duration_since(meta.started_at);

        SessionStats {
            status,
            session_id: meta.session_id,
            language: meta.language,
            started_at: meta.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            events_received: self.shared.events_received.load(Ordering::Relaxed),
            last_stats,
        }
    }
}

/// Offer a frame to the outbound path without blocking
///
/// Returns false once the writer is gone (connection closed). A full queue
/// is the backpressure signal: the frame is dropped and counted, and the
/// next frame is attempted normally.
fn offer_frame(shared: &Shared, out_tx: &mpsc::Sender<AudioFrame>, frame: AudioFrame) -> bool {
    match out_tx.try_send(frame) {
        Ok(()) => {
            shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(mpsc::error::TrySendError::Full(frame)) => {
            shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped frame {} under backpressure", frame.sequence);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Whether the session is still live from the pump's point of view: the
/// tasks are spawned just before the controller flips to `Streaming`, so
/// `Connecting` counts too. Anything else means an orderly shutdown or an
/// already-failed session.
async fn session_active(shared: &Shared) -> bool {
    matches!(
        *shared.status.lock().await,
        SessionStatus::Connecting | SessionStatus::Streaming
    )
}

/// Dedicated outbound writer: transmits one frame at a time, then closes
/// the outbound direction when the queue ends so the service can flush
/// trailing results.
async fn writer_loop(mut sink: FrameSink, mut out_rx: mpsc::Receiver<AudioFrame>) {
    while let Some(frame) = out_rx.recv().await {
        if let Err(e) = sink.send(&frame).await {
            warn!("Outbound frame path closed: {}", e);
            return;
        }
    }

    if let Err(e) = sink.finish().await {
        debug!("Close handshake on shutdown: {}", e);
    }
}

/// The single consumer for both activity sources: capture frames on the
/// device cadence and inbound events on the I/O cadence. All transcript and
/// counter mutation happens here, never in the capture callback.
async fn pump_loop(
    shared: Arc<Shared>,
    mut frame_rx: mpsc::Receiver<AudioFrame>,
    mut events: EventStream,
    out_tx: mpsc::Sender<AudioFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Session pump started");

    let mut out_tx = Some(out_tx);

    loop {
        tokio::select! {
            maybe_frame = frame_rx.recv(), if out_tx.is_some() => {
                match maybe_frame {
                    Some(frame) => {
                        if let Some(tx) = &out_tx {
                            if !offer_frame(&shared, tx, frame) {
                                // Writer gone; the inbound arm will report
                                // the connection loss.
                                out_tx = None;
                            }
                        }
                    }
                    None => {
                        // Capture ended. Expected during shutdown; mid-stream
                        // it means the device died, which is fatal.
                        if session_active(&shared).await {
                            error!("Capture stopped producing frames mid-session");
                            shared.fail("audio capture stopped unexpectedly").await;
                        }
                        out_tx = None;
                    }
                }
            }
            inbound = events.next_event() => {
                match inbound {
                    Ok(Some(event)) => {
                        shared.events_received.fetch_add(1, Ordering::Relaxed);
                        shared.document.lock().await.apply(event);
                    }
                    Ok(None) => {
                        if session_active(&shared).await {
                            error!("Recognition service closed the connection mid-session");
                            shared.fail("connection closed by recognition service").await;
                        }
                        break;
                    }
                    Err(e) => {
                        if session_active(&shared).await {
                            error!("Recognition channel failed: {}", e);
                            shared.fail(&e.to_string()).await;
                        }
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                // Stop offering frames and let the writer close the
                // outbound direction; keep merging trailing events until
                // the peer closes or the drain timeout forces shutdown.
                out_tx = None;
            }
        }
    }

    info!("Session pump stopped");
}
