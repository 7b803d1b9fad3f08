//! Error taxonomy for the live session engine

use thiserror::Error;

/// Capture-device errors. Fatal to session start; the engine never retries
/// device acquisition on its own.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No audio input device available")]
    NoInputDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device configuration: {0}")]
    DeviceConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Stream playback error: {0}")]
    StreamPlay(String),
}

/// Transport errors on the duplex channel. Always fatal to the session:
/// live audio lost during an outage cannot be replayed, so there is no
/// reconnect — recovery is a fresh session.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Cannot start session from state {0}")]
    InvalidState(&'static str),
}
