pub mod capture;
pub mod frame;

pub use capture::{CaptureBackend, MicrophoneBackend};
pub use frame::AudioFrame;
