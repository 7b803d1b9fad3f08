//! In-memory transcript state and event-merge rules

use crate::channel::{PerfStats, TranscriptEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Delimiter between committed segments
const SEGMENT_DELIMITER: &str = " ";

/// The single transcript document for a session
///
/// Mutated only by `apply`, in event-arrival order, from one consumer.
/// `committed` is append-only; `pending` and `entities` are replaced
/// wholesale by the corresponding events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptDocument {
    /// Finalized transcript text, append-only
    pub committed: String,
    /// Current tentative hypothesis; at most one exists at a time
    pub pending: String,
    /// Latest entity snapshot, category → value
    pub entities: BTreeMap<String, Value>,
    /// Latest performance snapshot from the service
    pub last_stats: Option<PerfStats>,
    /// Latest advisory error reported by the service
    pub last_error: Option<String>,
}

impl TranscriptDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one inbound event
    pub fn apply(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Partial { text } => {
                // Replace, never append: each partial supersedes the last
                self.pending = text;
            }
            TranscriptEvent::Final { text } => {
                if !self.committed.is_empty() {
                    self.committed.push_str(SEGMENT_DELIMITER);
                }
                self.committed.push_str(&text);
                self.pending.clear();
            }
            TranscriptEvent::EntityUpdate { entities } => {
                // Last full snapshot wins; no per-category merge
                self.entities = entities;
            }
            TranscriptEvent::Stats { stats } => {
                self.last_stats = Some(stats);
            }
            TranscriptEvent::Error { message } => {
                warn!("Recognition service reported: {}", message);
                self.last_error = Some(message);
            }
        }
    }

    /// Committed text plus the current hypothesis, for display
    pub fn display_text(&self) -> String {
        if self.pending.is_empty() {
            self.committed.clone()
        } else if self.committed.is_empty() {
            self.pending.clone()
        } else {
            format!("{}{}{}", self.committed, SEGMENT_DELIMITER, self.pending)
        }
    }
}
