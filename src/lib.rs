pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod session;

pub use audio::{AudioFrame, CaptureBackend, MicrophoneBackend};
pub use channel::{EventStream, FrameSink, PerfStats, TranscriptChannel, TranscriptEvent};
pub use config::Config;
pub use error::{ChannelError, DeviceError, SessionError};
pub use session::{
    SessionConfig, SessionStats, SessionStatus, StreamingSessionController, TranscriptDocument,
};
