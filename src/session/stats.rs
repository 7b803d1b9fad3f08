use crate::channel::PerfStats;
use crate::session::controller::SessionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of a recording session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Current lifecycle status
    pub status: SessionStatus,

    /// Client-generated session identifier, unique per recording attempt
    pub session_id: String,

    /// Language code the session was started with
    pub language: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames handed to the outbound path
    pub frames_sent: u64,

    /// Frames dropped under backpressure (outbound path saturated)
    pub frames_dropped: u64,

    /// Inbound events merged so far
    pub events_received: u64,

    /// Latest performance snapshot from the service, if any
    pub last_stats: Option<PerfStats>,
}
