//! Microphone capture backed by cpal

use super::frame::{downmix_to_mono, f32_to_i16, AudioFrame};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Number of frames the capture hand-off queue may hold before the device
/// callback starts dropping. The callback must never block on the consumer.
const HANDOFF_QUEUE_FRAMES: usize = 8;

/// Audio capture backend trait
///
/// Implementations:
/// - `MicrophoneBackend`: cpal input stream on the default or a named device
/// - test code provides scripted implementations that replay fixed frames
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames until the
    /// backend is stopped or the device fails. The channel closing while
    /// the backend has not been stopped means the device died.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError>;

    /// Stop capturing audio. Idempotent; safe to call before or without
    /// `start()` having completed.
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// cpal-based microphone backend
///
/// Each device callback delivers one fixed-size buffer of f32 samples; the
/// backend downmixes to mono, converts to PCM16, and hands the frame off
/// without blocking. Capture cadence is driven entirely by the device's own
/// buffering.
///
/// The cpal stream is not `Send`, so it is created, owned, and dropped on
/// one dedicated capture thread; this handle only carries flags and
/// channels across threads.
pub struct MicrophoneBackend {
    config: AudioConfig,
    is_capturing: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            is_capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        }
    }
}

fn acquire_device(config: &AudioConfig) -> Result<Device, DeviceError> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.device {
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::DeviceConfig(e.to_string()))?;
        devices
            .into_iter()
            .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.clone()))?
    } else {
        host.default_input_device()
            .ok_or(DeviceError::NoInputDevice)?
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    Ok(device)
}

/// Build and start the input stream. Runs on the capture thread, which must
/// also be the thread that drops the returned stream.
fn open_stream(
    config: &AudioConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, DeviceError> {
    let device = acquire_device(config)?;

    let supported = device
        .default_input_config()
        .map_err(|e| DeviceError::DeviceConfig(e.to_string()))?;
    let channels = supported.channels() as usize;

    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frame_samples),
    };

    info!(
        "Audio config: {} channels @ {} Hz, {} samples/frame",
        channels, config.sample_rate, config.frame_samples
    );

    // One sender shared by both callbacks. On a device error the error
    // callback takes it, closing the frame channel so the owning session
    // observes the failure and stops.
    let frame_tx = Arc::new(Mutex::new(Some(frame_tx)));
    let error_tx = Arc::clone(&frame_tx);
    let error_capturing = Arc::clone(&is_capturing);
    let sequence = AtomicU64::new(0);
    let started = Instant::now();

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !is_capturing.load(Ordering::Relaxed) {
                    return;
                }
                let Ok(guard) = frame_tx.lock() else { return };
                let Some(tx) = guard.as_ref() else { return };

                let mono = downmix_to_mono(data, channels);
                let frame = AudioFrame {
                    sequence: sequence.fetch_add(1, Ordering::Relaxed),
                    timestamp_ms: started.elapsed().as_millis() as u64,
                    samples: f32_to_i16(&mono),
                };

                // Non-blocking hand-off: the consumer falling behind must
                // never stall the device callback.
                if tx.try_send(frame).is_err() {
                    warn!("Capture hand-off queue full, dropping frame");
                }
            },
            move |err| {
                // A dead device is fatal: stop producing and close the
                // frame channel so the session layer sees the death.
                error!("Audio stream error: {}", err);
                error_capturing.store(false, Ordering::SeqCst);
                if let Ok(mut guard) = error_tx.lock() {
                    guard.take();
                }
            },
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeviceError::StreamPlay(e.to_string()))?;

    Ok(stream)
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        let (frame_tx, frame_rx) = mpsc::channel(HANDOFF_QUEUE_FRAMES);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let config = self.config.clone();
        let is_capturing = Arc::clone(&self.is_capturing);

        let worker = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, frame_tx, Arc::clone(&is_capturing)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                is_capturing.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Park until stop; dropping the stream here releases the
                // device on the thread that created it.
                let _ = stop_rx.blocking_recv();
                drop(stream);
                is_capturing.store(false, Ordering::SeqCst);
            })
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                info!("Microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(DeviceError::StreamBuild(
                    "capture thread exited during setup".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        let was_active = self.stop_tx.is_some() || self.worker.is_some();

        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }

        if was_active {
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.is_capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}
