use std::time::Duration;

/// Configuration for a streaming session controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the recognition service, e.g. "ws://localhost:8000"
    pub engine_url: String,

    /// How long shutdown waits for trailing final/entity events after the
    /// outbound direction is closed, before the inbound side is forced shut
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine_url: "ws://localhost:8000".to_string(),
            drain_timeout: Duration::from_secs(3),
        }
    }
}
