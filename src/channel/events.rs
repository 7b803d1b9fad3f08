use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Performance snapshot pushed by the recognition service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfStats {
    /// Real-time factor: processing time over audio duration
    pub rtf: f64,
    pub cpu_load: f64,
}

/// Inbound event from the recognition service
///
/// Closed set of the five wire shapes; anything else fails to parse and is
/// dropped at the boundary rather than pattern-matched downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// Tentative hypothesis, replaced wholesale by the next partial
    Partial { text: String },
    /// Authoritative result, appended to the committed transcript
    Final { text: String },
    /// Full category→value snapshot; absent categories are dropped
    EntityUpdate { entities: BTreeMap<String, Value> },
    Stats { stats: PerfStats },
    Error { message: String },
}

impl TranscriptEvent {
    /// Parse one inbound payload. Malformed messages and unknown event tags
    /// yield `None`; the connection stays up.
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Dropping unparseable transcript event: {}", e);
                None
            }
        }
    }
}
