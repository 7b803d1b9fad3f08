pub mod events;
pub mod ws;

pub use events::{PerfStats, TranscriptEvent};
pub use ws::{EventStream, FrameSink, TranscriptChannel};
