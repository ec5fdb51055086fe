//! Raw speech events and the transcript segments derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single caption line as observed during capture.
///
/// Events are immutable once written and ordered by `sequence_number`.
/// Each event carries the *cumulative* caption line so far, so a later
/// event for the same speaker replaces the text of the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpeechEvent {
    /// Meeting this event belongs to
    pub meeting_id: String,

    /// Ordering key within the meeting
    pub sequence_number: i64,

    /// Speaker label from the caption source (may be missing)
    pub speaker_label: Option<String>,

    /// Cumulative caption text at the time of observation
    pub text: String,

    /// When the caption was observed
    pub observed_at: DateTime<Utc>,
}

/// A finalized run of same-speaker captions.
///
/// Derived by the aggregator, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub meeting_id: String,
    pub speaker: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
