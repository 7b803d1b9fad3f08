//! Streaming session management
//!
//! This module provides the `StreamingSessionController` abstraction that
//! manages:
//! - The recording lifecycle state machine (start/stop/fail)
//! - Audio frame flow into the recognition channel under backpressure
//! - Merging inbound events into the transcript document
//! - Session statistics and state exposure

mod config;
mod controller;
mod document;
mod stats;

pub use config::SessionConfig;
pub use controller::{SessionStatus, StreamingSessionController};
pub use document::TranscriptDocument;
pub use stats::SessionStats;
