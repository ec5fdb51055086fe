//! Caption aggregation.
//!
//! Folds the raw, possibly-fragmentary caption stream into finalized
//! speaker-attributed segments. Speaker changes are the only boundary
//! signal; each event carries the cumulative line so far, so text is
//! replaced, never appended.

use chrono::{DateTime, Utc};

use crate::domain::{RawSpeechEvent, TranscriptSegment};

/// Folds an ordered stream of caption events into transcript segments.
///
/// Maintains at most one open segment. Feeding the same stream twice
/// produces identical output.
pub struct CaptionAggregator {
    meeting_id: String,
    open: Option<OpenSegment>,
    segments: Vec<TranscriptSegment>,
    last_speaker: Option<String>,
}

struct OpenSegment {
    speaker: String,
    text: String,
    start_time: DateTime<Utc>,
}

impl CaptionAggregator {
    pub fn new(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            open: None,
            segments: Vec::new(),
            last_speaker: None,
        }
    }

    /// Fold one event into the aggregation state.
    ///
    /// A missing or empty speaker label inherits the most recent non-empty
    /// label seen so far and never starts a new segment on its own; before
    /// any labeled event, the label is the empty string.
    pub fn ingest(&mut self, event: &RawSpeechEvent) {
        let speaker = self.resolve_speaker(event);

        match self.open {
            None => {
                self.open = Some(OpenSegment {
                    speaker,
                    text: event.text.clone(),
                    start_time: event.observed_at,
                });
            }
            Some(ref mut open) if open.speaker == speaker => {
                // Cumulative line: replace, don't append
                open.text = event.text.clone();
            }
            Some(_) => {
                self.close_open(event.observed_at);
                self.open = Some(OpenSegment {
                    speaker,
                    text: event.text.clone(),
                    start_time: event.observed_at,
                });
            }
        }
    }

    /// Force-close any open segment and return the finalized list.
    ///
    /// The forced flush uses "now" as the end time; it is the only way a
    /// partially-filled segment becomes visible.
    pub fn finish(mut self) -> Vec<TranscriptSegment> {
        if self.open.is_some() {
            self.close_open(Utc::now());
        }
        self.segments
    }

    /// Convenience: aggregate a complete event stream in one call.
    pub fn aggregate(meeting_id: &str, events: &[RawSpeechEvent]) -> Vec<TranscriptSegment> {
        let mut agg = Self::new(meeting_id);
        for event in events {
            agg.ingest(event);
        }
        agg.finish()
    }

    fn resolve_speaker(&mut self, event: &RawSpeechEvent) -> String {
        match event.speaker_label.as_deref() {
            Some(label) if !label.is_empty() => {
                self.last_speaker = Some(label.to_string());
                label.to_string()
            }
            _ => self.last_speaker.clone().unwrap_or_default(),
        }
    }

    fn close_open(&mut self, end_time: DateTime<Utc>) {
        if let Some(open) = self.open.take() {
            self.segments.push(TranscriptSegment {
                meeting_id: self.meeting_id.clone(),
                speaker: open.speaker,
                text: open.text,
                start_time: open.start_time,
                end_time,
            });
        }
    }
}

/// Flatten segments into the transcript string handed to the extraction
/// capability: one line per segment with speaker and time span.
pub fn render_transcript(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push_str(&format!(
            "{}: {} (start: {}, end: {})\n",
            segment.speaker,
            segment.text,
            segment.start_time.to_rfc3339(),
            segment.end_time.to_rfc3339(),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(seq: i64, speaker: Option<&str>, text: &str) -> RawSpeechEvent {
        RawSpeechEvent {
            meeting_id: "m1".to_string(),
            sequence_number: seq,
            speaker_label: speaker.map(|s| s.to_string()),
            text: text.to_string(),
            observed_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_stream_yields_empty_list() {
        let segments = CaptionAggregator::aggregate("m1", &[]);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_single_speaker_run_replaces_text() {
        let events = vec![
            event(1, Some("Alice"), "hi"),
            event(2, Some("Alice"), "hi there"),
            event(3, Some("Alice"), "hi there everyone"),
        ];

        let segments = CaptionAggregator::aggregate("m1", &events);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "Alice");
        // Cumulative line: latest value wins, never concatenated
        assert_eq!(segments[0].text, "hi there everyone");
    }

    #[test]
    fn test_speaker_change_closes_segment() {
        let events = vec![
            event(1, Some("Alice"), "first point"),
            event(2, Some("Bob"), "second point"),
        ];

        let segments = CaptionAggregator::aggregate("m1", &events);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker, "Alice");
        assert_eq!(segments[1].speaker, "Bob");
        // Closed segment ends where the next one starts
        assert_eq!(segments[0].end_time, events[1].observed_at);
        assert_eq!(segments[1].start_time, events[1].observed_at);
    }

    #[test]
    fn test_speaker_forward_fill() {
        let events = vec![
            event(1, Some("Alice"), "hi"),
            event(2, None, "hi there"),
            event(3, Some("Bob"), "hey"),
        ];

        let segments = CaptionAggregator::aggregate("m1", &events);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker, "Alice");
        assert_eq!(segments[0].text, "hi there");
        assert_eq!(segments[1].speaker, "Bob");
    }

    #[test]
    fn test_unlabeled_prefix_gets_empty_speaker() {
        let events = vec![event(1, None, "unattributed"), event(2, Some("Bob"), "hey")];

        let segments = CaptionAggregator::aggregate("m1", &events);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker, "");
        assert_eq!(segments[1].speaker, "Bob");
    }

    #[test]
    fn test_empty_label_treated_as_missing() {
        let events = vec![
            event(1, Some("Alice"), "hi"),
            event(2, Some(""), "hi there"),
        ];

        let segments = CaptionAggregator::aggregate("m1", &events);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "Alice");
        assert_eq!(segments[0].text, "hi there");
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let events = vec![
            event(1, Some("Alice"), "hi"),
            event(2, None, "hi there"),
            event(3, Some("Bob"), "hey"),
            event(4, Some("Bob"), "hey all"),
            event(5, Some("Alice"), "back to me"),
        ];

        let first = CaptionAggregator::aggregate("m1", &events);
        let second = CaptionAggregator::aggregate("m1", &events);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.speaker, b.speaker);
            assert_eq!(a.text, b.text);
            assert_eq!(a.start_time, b.start_time);
        }
    }

    #[test]
    fn test_render_transcript_format() {
        let events = vec![event(1, Some("Alice"), "hello"), event(2, Some("Bob"), "hi")];
        let segments = CaptionAggregator::aggregate("m1", &events);

        let rendered = render_transcript(&segments);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Alice: hello (start: "));
        assert!(lines[1].starts_with("Bob: hi (start: "));
        assert!(lines[0].contains(", end: "));
    }
}
